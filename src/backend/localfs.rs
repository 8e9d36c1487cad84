// src/backend/localfs.rs

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::backend::{enforce_retention, Backend, CopyUsage, QuotaTarget};
use crate::errors::{BackdagError, Result};
use crate::exec::ExecUnit;

/// `[task.<id>.backend-param]` for the localfs backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LocalFsParams {
    /// Directory holding one timestamp-named subdirectory per backup copy.
    root: PathBuf,

    /// Maximum number of copies to keep; absent means unbounded.
    #[serde(default)]
    nb_copy_limit: Option<u64>,

    /// Maximum cumulative size in bytes; absent means unbounded.
    #[serde(default)]
    root_size_limit: Option<u64>,

    /// Octal permission mode for created directories.
    #[serde(default)]
    dmode: Option<String>,

    /// Octal permission mode applied to sunk files on rotate.
    #[serde(default)]
    fmode: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Run directory created by `open`, if a session is active.
    current: Option<PathBuf>,

    /// Destinations handed out by `sink`, chmodded on rotate.
    sinks: Vec<PathBuf>,
}

/// Backend writing copies into timestamp-named directories under a local
/// root.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    dmode: u32,
    fmode: u32,
    quota: QuotaTarget,
    state: Mutex<SessionState>,
}

impl LocalFsBackend {
    pub fn from_params(params: &toml::Table) -> Result<Self> {
        let params: LocalFsParams = toml::Value::Table(params.clone()).try_into()?;

        Ok(Self {
            root: params.root,
            dmode: parse_mode(params.dmode.as_deref().unwrap_or("750"))?,
            fmode: parse_mode(params.fmode.as_deref().unwrap_or("640"))?,
            quota: QuotaTarget {
                max_copies: params.nb_copy_limit,
                max_total_size: params.root_size_limit,
            },
            state: Mutex::new(SessionState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current(&self) -> Result<PathBuf> {
        self.lock()
            .current
            .clone()
            .ok_or_else(|| BackdagError::Backend("localfs session is not open".into()))
    }
}

impl Backend for LocalFsBackend {
    fn name(&self) -> &'static str {
        "localfs"
    }

    fn open(&self) -> Result<()> {
        let dir = self.root.join(mkprefix_iso8601());
        fs::DirBuilder::new()
            .recursive(true)
            .mode(self.dmode)
            .create(&dir)
            .with_context(|| format!("creating backup directory {:?}", dir))?;
        debug!(dir = %dir.display(), "opened localfs session");

        let mut state = self.lock();
        state.current = Some(dir);
        state.sinks.clear();
        Ok(())
    }

    fn sink(&self, path: &str) -> Result<ExecUnit> {
        let dest = self.current()?.join(path);
        if let Some(parent) = dest.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(self.dmode)
                .create(parent)
                .with_context(|| format!("creating sink directory {:?}", parent))?;
        }

        self.lock().sinks.push(dest.clone());

        Ok(ExecUnit::new(vec![
            "/bin/cp".into(),
            "/dev/stdin".into(),
            dest.display().to_string(),
        ]))
    }

    fn rotate(&self) -> Result<()> {
        let sinks = self.lock().sinks.clone();
        for path in sinks.iter() {
            fs::set_permissions(path, fs::Permissions::from_mode(self.fmode))
                .with_context(|| format!("setting permissions on {:?}", path))?;
        }

        enforce_retention(self)
    }

    fn rollback(&self) {
        if let Some(dir) = self.lock().current.clone() {
            debug!(dir = %dir.display(), "rolling back localfs session");
            let _ = fs::remove_dir_all(&dir);
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn usage_info(&self) -> Result<Vec<CopyUsage>> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("listing backup root {:?}", self.root))?
        {
            let entry = entry?;
            let ft = entry.file_type()?;
            if ft.is_dir() && !ft.is_symlink() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        dirs.into_iter()
            .map(|dir| {
                Ok(CopyUsage {
                    size: dir_size(&dir)?,
                    id: dir.display().to_string(),
                })
            })
            .collect()
    }

    fn excluded_copies(&self) -> HashSet<String> {
        let mut excluded = HashSet::new();
        if let Some(dir) = self.lock().current.as_ref() {
            excluded.insert(dir.display().to_string());
        }
        excluded
    }

    fn remove_copies(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            debug!(copy = %id, "removing expired copy");
            fs::remove_dir_all(id).with_context(|| format!("removing {id}"))?;
        }
        Ok(())
    }

    fn quota_target(&self) -> QuotaTarget {
        self.quota
    }
}

/// ISO-8601 timestamp prefix, second precision, UTC.
fn mkprefix_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Cumulative size of regular files under `path`; symlinked entries are
/// excluded from the accounting.
fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        if ft.is_symlink() {
            continue;
        }
        if ft.is_dir() {
            total += dir_size(&entry.path())?;
        } else if ft.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8)
        .map_err(|_| BackdagError::Config(format!("invalid permission mode '{mode}'")))
}
