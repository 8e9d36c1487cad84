use std::error::Error;
use std::fs;

use backdag::config::model::{ConfigFile, Defaults};
use backdag::config::validate::validate_config;
use backdag::engine::BackupJob;
use backdag::errors::BackdagError;
use backdag::exec::{build_catalog, RunContext};

type TestResult = Result<(), Box<dyn Error>>;

/// Build and run the "default" task from an inline config.
async fn run_task(toml_src: &str) -> backdag::errors::Result<()> {
    let cfg: ConfigFile = toml::from_str(toml_src).expect("test config must parse");
    let defaults = Defaults::default();
    validate_config(&cfg, &defaults)?;

    let catalog = build_catalog(&cfg.exec)?;
    let task = cfg.task.get("default").expect("test config has a default task");
    let ctx = RunContext::new(tracing::Level::INFO);
    let job = BackupJob::from_config(task, &catalog, &defaults, ctx, cfg.settings.workers)?;
    job.run().await
}

#[tokio::test]
async fn independent_objects_run_exactly_once() -> TestResult {
    let dir = tempfile::tempdir()?;
    let a = dir.path().join("a.log");
    let b = dir.path().join("b.log");

    run_task(&format!(
        r#"
[task.default]
backend = "null"

[[task.default.objects]]
path = "a"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", "echo ran >> {a}"] }}]

[[task.default.objects]]
path = "b"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", "echo ran >> {b}"] }}]
"#,
        a = a.display(),
        b = b.display(),
    ))
    .await?;

    assert_eq!(fs::read_to_string(&a)?, "ran\n");
    assert_eq!(fs::read_to_string(&b)?, "ran\n");
    Ok(())
}

#[tokio::test]
async fn dependent_object_runs_strictly_after_blocker() -> TestResult {
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("a-done");

    // "b" fails unless "a" finished before it was even dispatched.
    run_task(&format!(
        r#"
[task.default]
backend = "null"

[[task.default.groups]]
id = "pre"

[[task.default.groups]]
id = "data"
depends = ["pre"]

[[task.default.objects]]
path = "a"
group = "pre"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", "sleep 0.2 && : > {marker}"], env = {{ PATH = "/usr/bin:/bin" }} }}]

[[task.default.objects]]
path = "b"
group = "data"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", "test -f {marker}"] }}]
"#,
        marker = marker.display(),
    ))
    .await?;

    Ok(())
}

#[tokio::test]
async fn independent_objects_dispatch_concurrently() -> TestResult {
    let dir = tempfile::tempdir()?;
    let d = dir.path().display();

    // Each object waits for the markers of all three; this only terminates
    // when every candidate was dispatched without waiting for completions.
    let script = |i: usize| {
        format!(
            ": > {d}/m{i}; n=0; \
             while [ ! -f {d}/m1 ] || [ ! -f {d}/m2 ] || [ ! -f {d}/m3 ]; do \
             n=$((n+1)); [ \"$n\" -gt 200 ] && exit 1; sleep 0.02; done"
        )
    };

    run_task(&format!(
        r#"
[settings]
workers = -1

[task.default]
backend = "null"

[[task.default.objects]]
path = "m1"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", '{s1}'], env = {{ PATH = "/usr/bin:/bin" }} }}]

[[task.default.objects]]
path = "m2"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", '{s2}'], env = {{ PATH = "/usr/bin:/bin" }} }}]

[[task.default.objects]]
path = "m3"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", '{s3}'], env = {{ PATH = "/usr/bin:/bin" }} }}]
"#,
        s1 = script(1),
        s2 = script(2),
        s3 = script(3),
    ))
    .await?;

    Ok(())
}

#[tokio::test]
async fn pipeline_failure_rolls_back_the_session() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("backups");
    let sibling = tmp.path().join("sibling-ran");

    let result = run_task(&format!(
        r#"
[task.default]
backend = "localfs"

[task.default.backend-param]
root = "{root}"

[[task.default.objects]]
path = "ok"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", ": > {sibling}"] }}]

[[task.default.objects]]
path = "bad"
pipeline = [{{ type = "exec-inline", argv = ["/bin/sh", "-c", "exit 1"] }}]
"#,
        root = root.display(),
        sibling = sibling.display(),
    ))
    .await;

    match result {
        Err(BackdagError::ProcessFailure { code: 1, .. }) => {}
        other => panic!("expected ProcessFailure, got {other:?}"),
    }

    // The sibling pipeline was not cancelled; it was awaited before the
    // session was rolled back.
    assert!(sibling.exists());

    // The run directory was rolled back; nothing is left under the root.
    let leftovers: Vec<_> = fs::read_dir(&root)?.collect();
    assert!(leftovers.is_empty());
    Ok(())
}
