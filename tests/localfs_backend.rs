use std::error::Error;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use backdag::backend::{Backend, LocalFsBackend};

type TestResult = Result<(), Box<dyn Error>>;

fn backend(root: &std::path::Path, extra: &str) -> LocalFsBackend {
    let params: toml::Table = toml::from_str(&format!(
        "root = \"{}\"\n{extra}",
        root.display()
    ))
    .expect("test params must parse");
    LocalFsBackend::from_params(&params).expect("test backend must build")
}

fn run_dirs(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut dirs: Vec<_> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    dirs.sort();
    dirs
}

#[test]
fn open_creates_run_directory() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("backups");

    let backend = backend(&root, "");
    backend.open()?;

    assert_eq!(run_dirs(&root).len(), 1);
    Ok(())
}

#[test]
fn sink_prepares_directories_and_rotate_fixes_modes() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("backups");

    let backend = backend(&root, "fmode = \"600\"\n");
    backend.open()?;

    let sink = backend.sink("db/dump.sql")?;
    let dest = std::path::PathBuf::from(sink.argv().last().unwrap());
    assert!(dest.parent().unwrap().is_dir());

    // Stand in for the sink command actually running.
    fs::write(&dest, b"data")?;

    backend.rotate()?;
    let mode = fs::metadata(&dest)?.permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
    Ok(())
}

#[test]
fn rollback_removes_run_directory() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("backups");

    let backend = backend(&root, "");
    backend.open()?;
    backend.sink("file")?;
    assert_eq!(run_dirs(&root).len(), 1);

    backend.rollback();
    assert_eq!(run_dirs(&root).len(), 0);
    Ok(())
}

#[test]
fn rotate_evicts_old_copies_excluding_current_run() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("backups");

    // Three pre-existing copies, oldest first by name.
    for (name, content) in [
        ("2020-01-01T00:00:00Z", vec![0u8; 10]),
        ("2020-01-02T00:00:00Z", vec![0u8; 20]),
        ("2020-01-03T00:00:00Z", vec![0u8; 30]),
    ] {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("payload"), content)?;
    }

    let backend = backend(&root, "nb-copy-limit = 1\n");
    backend.open()?;
    backend.rotate()?;

    // Four copies against a limit of one: the three old ones go, the
    // in-progress run stays.
    let remaining = run_dirs(&root);
    assert_eq!(remaining.len(), 1);
    let name = remaining[0].file_name().unwrap().to_string_lossy();
    assert!(!name.starts_with("2020-"), "{name}");
    Ok(())
}

#[test]
fn usage_info_sizes_skip_symlinks() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("backups");

    let copy = root.join("2020-01-01T00:00:00Z");
    fs::create_dir_all(&copy)?;
    fs::write(copy.join("payload"), vec![0u8; 42])?;
    std::os::unix::fs::symlink(copy.join("payload"), copy.join("alias"))?;

    let backend = backend(&root, "");
    let usage = backend.usage_info()?;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].size, 42);
    Ok(())
}
