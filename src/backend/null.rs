// src/backend/null.rs

use std::collections::HashSet;

use crate::backend::{Backend, CopyUsage, QuotaTarget};
use crate::errors::Result;
use crate::exec::ExecUnit;

/// Backend that discards everything. Useful for exercising job
/// configurations without touching storage.
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn sink(&self, _path: &str) -> Result<ExecUnit> {
        Ok(ExecUnit::new(vec![
            "/bin/cp".into(),
            "/dev/stdin".into(),
            "/dev/null".into(),
        ]))
    }

    fn rotate(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) {}

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn usage_info(&self) -> Result<Vec<CopyUsage>> {
        Ok(Vec::new())
    }

    fn excluded_copies(&self) -> HashSet<String> {
        HashSet::new()
    }

    fn remove_copies(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }

    fn quota_target(&self) -> QuotaTarget {
        QuotaTarget::default()
    }
}
