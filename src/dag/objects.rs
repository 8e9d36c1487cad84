// src/dag/objects.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::model::{Defaults, TaskConfig};
use crate::errors::{BackdagError, Result};
use crate::exec::ExecUnit;

/// Stable index of an object in the job's arena.
///
/// Objects and groups are constructed once from configuration and addressed
/// by index everywhere afterwards, so identity never depends on reference
/// equality or hashing of the object contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub usize);

impl ObjId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One backup unit: a pipeline of process units plus a destination path.
#[derive(Debug, Clone)]
pub struct BackupObject {
    /// Destination path, unique across the whole job.
    pub path: String,

    /// Ordered process units; the final stage's output feeds the sink.
    pub pipeline: Vec<ExecUnit>,

    /// Index of the owning group.
    pub group: usize,
}

/// A named bucket of objects sharing dependency edges.
#[derive(Debug, Clone)]
pub struct ObjectGroup {
    pub id: String,

    /// Indices of the groups this group waits on.
    pub depends: Vec<usize>,

    /// Objects belonging to this group.
    pub objects: Vec<ObjId>,
}

/// Build the object/group arenas for one task.
///
/// The group listed in `defaults` exists implicitly; objects that name no
/// group land there. Assumes the config already passed
/// [`crate::config::validate_config`], but duplicate paths and dangling
/// references are still rejected here since they would corrupt the arenas.
pub fn build_objects(
    task: &TaskConfig,
    catalog: &BTreeMap<String, ExecUnit>,
    defaults: &Defaults,
) -> Result<(Vec<BackupObject>, Vec<ObjectGroup>)> {
    let mut groups: Vec<ObjectGroup> = Vec::new();
    let mut group_index: HashMap<&str, usize> = HashMap::new();

    for cfg in task.groups.iter() {
        if group_index.contains_key(cfg.id.as_str()) {
            return Err(BackdagError::Config(format!(
                "duplicate object group '{}'",
                cfg.id
            )));
        }
        group_index.insert(cfg.id.as_str(), groups.len());
        groups.push(ObjectGroup {
            id: cfg.id.clone(),
            depends: Vec::new(),
            objects: Vec::new(),
        });
    }

    for cfg in task.groups.iter() {
        let gi = group_index[cfg.id.as_str()];
        for dep in cfg.depends.iter() {
            if dep == &cfg.id {
                return Err(BackdagError::Config(format!(
                    "object group '{}' depends on itself",
                    cfg.id
                )));
            }
            let di = *group_index.get(dep.as_str()).ok_or_else(|| {
                BackdagError::Config(format!(
                    "object group '{}' has unknown dependency '{dep}'",
                    cfg.id
                ))
            })?;
            groups[gi].depends.push(di);
        }
    }

    // The default group exists even when not declared.
    if !group_index.contains_key(defaults.group_id) {
        group_index.insert(defaults.group_id, groups.len());
        groups.push(ObjectGroup {
            id: defaults.group_id.to_string(),
            depends: Vec::new(),
            objects: Vec::new(),
        });
    }

    let mut objects: Vec<BackupObject> = Vec::new();
    let mut paths: HashSet<&str> = HashSet::new();

    for cfg in task.objects.iter() {
        if !paths.insert(cfg.path.as_str()) {
            return Err(BackdagError::Config(format!(
                "duplicate object path '{}'",
                cfg.path
            )));
        }

        let gid = cfg.group.as_deref().unwrap_or(defaults.group_id);
        let gi = *group_index.get(gid).ok_or_else(|| {
            BackdagError::Config(format!(
                "object '{}' references unknown group '{gid}'",
                cfg.path
            ))
        })?;

        let mut pipeline = Vec::with_capacity(cfg.pipeline.len());
        for step in cfg.pipeline.iter() {
            pipeline.push(ExecUnit::from_step(catalog, step)?);
        }

        let id = ObjId(objects.len());
        objects.push(BackupObject {
            path: cfg.path.clone(),
            pipeline,
            group: gi,
        });
        groups[gi].objects.push(id);
    }

    Ok((objects, groups))
}
