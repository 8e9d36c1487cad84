// src/backend/mod.rs

//! Storage backends.
//!
//! A backend owns one transactional session per job run: `open` before any
//! pipeline runs, then exactly one of `rotate` (success) or `rollback`
//! (failure), then always `close`. While the session is open, concurrently
//! running pipelines call `sink` to obtain the command that commits their
//! output, so implementations must keep their session bookkeeping safe under
//! concurrent calls.
//!
//! The capacity-based retention policy is shared by every backend via
//! [`enforce_retention`]; backends only supply the usage/removal hooks.

pub mod localfs;
pub mod null;

use std::collections::HashSet;

use tracing::debug;

use crate::errors::{BackdagError, Result};
use crate::exec::ExecUnit;

pub use localfs::LocalFsBackend;
pub use null::NullBackend;

/// One completed (or in-progress) backup copy known to the backend.
///
/// Copy identifiers are timestamp-prefixed, so sorting them ascending is
/// chronological order, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyUsage {
    pub id: String,
    pub size: u64,
}

/// Capacity targets for retention; `None` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaTarget {
    pub max_copies: Option<u64>,
    pub max_total_size: Option<u64>,
}

/// The backend capability contract.
///
/// Implemented by [`NullBackend`], [`LocalFsBackend`], and externally
/// supplied backends (e.g. object storage).
pub trait Backend: Send + Sync {
    /// Selector id, also used as the logging name.
    fn name(&self) -> &'static str;

    /// Begin a session: set up the destination for the current run.
    fn open(&self) -> Result<()>;

    /// Command that commits a pipeline's output to `path` within the current
    /// run. Called concurrently from worker tasks.
    fn sink(&self, path: &str) -> Result<ExecUnit>;

    /// Commit the session, enforcing retention.
    fn rotate(&self) -> Result<()>;

    /// Abandon the session, removing whatever the current run wrote.
    /// Best-effort: errors are swallowed.
    fn rollback(&self);

    /// Tear down the session. Called exactly once, after `rotate` or
    /// `rollback`, regardless of outcome.
    fn close(&self) -> Result<()>;

    /// All copies under the backend's root, sorted ascending by id.
    fn usage_info(&self) -> Result<Vec<CopyUsage>>;

    /// Copies never eligible for eviction (the in-progress run).
    fn excluded_copies(&self) -> HashSet<String>;

    /// Remove the given copies.
    fn remove_copies(&self, ids: &[String]) -> Result<()>;

    /// Capacity targets for [`enforce_retention`].
    fn quota_target(&self) -> QuotaTarget;
}

/// Shared retention algorithm.
///
/// Walks the copies oldest-first, skipping excluded ones, accumulating
/// deletions while either the deleted size is still short of the size
/// overflow or the deleted count is still short of the count overflow; the
/// scan stops only once both targets are met or candidates run out.
pub fn enforce_retention(backend: &dyn Backend) -> Result<()> {
    let quota = backend.quota_target();
    let copies = backend.usage_info()?;
    let excluded = backend.excluded_copies();

    let total_size: u64 = copies.iter().map(|c| c.size).sum();
    let count = copies.len() as u64;
    debug!(
        backend = backend.name(),
        total_size, nb_copies = count, "usage before rotation"
    );

    let size_ok = quota.max_total_size.is_none_or(|max| total_size <= max);
    let count_ok = quota.max_copies.is_none_or(|max| count <= max);
    if size_ok && count_ok {
        debug!(backend = backend.name(), "no action required for rotation");
        return Ok(());
    }

    let size_overflow = quota.max_total_size.map(|max| total_size.saturating_sub(max));
    let count_overflow = quota.max_copies.map(|max| count.saturating_sub(max));

    let mut deleted_size: u64 = 0;
    let mut doomed: Vec<String> = Vec::new();
    for copy in copies {
        let size_unmet = size_overflow.is_some_and(|o| deleted_size < o);
        let count_unmet = count_overflow.is_some_and(|o| (doomed.len() as u64) < o);
        if !size_unmet && !count_unmet {
            break;
        }
        if excluded.contains(&copy.id) {
            continue;
        }
        deleted_size += copy.size;
        doomed.push(copy.id);
    }

    debug!(
        backend = backend.name(),
        expired = doomed.len(),
        freed = deleted_size,
        "copies deemed expired"
    );

    backend.remove_copies(&doomed)
}

/// Construct a backend from its selector id and opaque parameter table.
pub fn make_backend(kind: &str, params: &toml::Table) -> Result<Box<dyn Backend>> {
    match kind {
        "null" => Ok(Box::new(NullBackend::new())),
        "localfs" => Ok(Box::new(LocalFsBackend::from_params(params)?)),
        other => Err(BackdagError::Config(format!(
            "unknown backend '{other}'"
        ))),
    }
}
