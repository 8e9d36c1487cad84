use std::collections::HashSet;
use std::error::Error;
use std::sync::Mutex;

use backdag::backend::{enforce_retention, Backend, CopyUsage, QuotaTarget};
use backdag::errors::Result as BackdagResult;
use backdag::exec::ExecUnit;

type TestResult = Result<(), Box<dyn Error>>;

/// In-memory backend exposing just the retention hooks.
struct FakeBackend {
    copies: Vec<CopyUsage>,
    excluded: HashSet<String>,
    quota: QuotaTarget,
    removed: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn new(copies: &[(&str, u64)], excluded: &[&str], quota: QuotaTarget) -> Self {
        Self {
            copies: copies
                .iter()
                .map(|(id, size)| CopyUsage {
                    id: id.to_string(),
                    size: *size,
                })
                .collect(),
            excluded: excluded.iter().map(|s| s.to_string()).collect(),
            quota,
            removed: Mutex::new(Vec::new()),
        }
    }

    fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn open(&self) -> BackdagResult<()> {
        Ok(())
    }

    fn sink(&self, _path: &str) -> BackdagResult<ExecUnit> {
        Ok(ExecUnit::new(vec!["/bin/true".into()]))
    }

    fn rotate(&self) -> BackdagResult<()> {
        enforce_retention(self)
    }

    fn rollback(&self) {}

    fn close(&self) -> BackdagResult<()> {
        Ok(())
    }

    fn usage_info(&self) -> BackdagResult<Vec<CopyUsage>> {
        Ok(self.copies.clone())
    }

    fn excluded_copies(&self) -> HashSet<String> {
        self.excluded.clone()
    }

    fn remove_copies(&self, ids: &[String]) -> BackdagResult<()> {
        self.removed.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    fn quota_target(&self) -> QuotaTarget {
        self.quota
    }
}

fn quota(max_copies: impl Into<Option<u64>>, max_total_size: impl Into<Option<u64>>) -> QuotaTarget {
    QuotaTarget {
        max_copies: max_copies.into(),
        max_total_size: max_total_size.into(),
    }
}

#[test]
fn within_target_is_a_noop() -> TestResult {
    let backend = FakeBackend::new(
        &[("2024-01-01", 40), ("2024-01-02", 60)],
        &[],
        quota(2, 100),
    );
    enforce_retention(&backend)?;
    assert!(backend.removed().is_empty());
    Ok(())
}

#[test]
fn unbounded_quota_never_deletes() -> TestResult {
    let backend = FakeBackend::new(
        &[("2024-01-01", 1 << 40), ("2024-01-02", 1 << 40)],
        &[],
        quota(None, None),
    );
    enforce_retention(&backend)?;
    assert!(backend.removed().is_empty());
    Ok(())
}

#[test]
fn deletes_oldest_until_both_limits_met() -> TestResult {
    // total 170 bytes over a 100-byte limit, 4 copies over a 2-copy limit.
    let backend = FakeBackend::new(
        &[
            ("2024-01-01", 50),
            ("2024-01-02", 80),
            ("2024-01-03", 10),
            ("2024-01-04", 30),
        ],
        &["2024-01-04"],
        quota(2, 100),
    );
    enforce_retention(&backend)?;

    // Deleting the two oldest satisfies both the size overflow (70) and the
    // count overflow (2); the scan stops there.
    assert_eq!(backend.removed(), vec!["2024-01-01", "2024-01-02"]);
    Ok(())
}

#[test]
fn count_only_overflow_deletes_by_count() -> TestResult {
    let backend = FakeBackend::new(
        &[("2024-01-01", 1), ("2024-01-02", 1), ("2024-01-03", 1)],
        &[],
        quota(1, None),
    );
    enforce_retention(&backend)?;
    assert_eq!(backend.removed(), vec!["2024-01-01", "2024-01-02"]);
    Ok(())
}

#[test]
fn excluded_copy_is_skipped_but_still_counted() -> TestResult {
    // The in-progress copy is the oldest: it still contributes to the
    // computed overflow but is never deleted.
    let backend = FakeBackend::new(
        &[
            ("2024-01-01", 90),
            ("2024-01-02", 50),
            ("2024-01-03", 40),
        ],
        &["2024-01-01"],
        quota(1, 100),
    );
    enforce_retention(&backend)?;
    assert_eq!(backend.removed(), vec!["2024-01-02", "2024-01-03"]);
    Ok(())
}

#[test]
fn stops_when_only_excluded_candidates_remain() -> TestResult {
    let backend = FakeBackend::new(
        &[("2024-01-01", 500)],
        &["2024-01-01"],
        quota(0, 100),
    );
    enforce_retention(&backend)?;
    assert!(backend.removed().is_empty());
    Ok(())
}
