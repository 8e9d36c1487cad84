// src/dag/resolver.rs

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::dag::objects::{ObjId, ObjectGroup};
use crate::errors::{BackdagError, Result};

/// Per-run dependency state.
///
/// Built once from the group arenas, mutated only through
/// [`DepResolver::mark_fulfilled`], and discarded at the end of the run.
///
/// - `blocked_by`: object -> objects it is still waiting on
/// - `unblocks`: object -> objects waiting on it
/// - `ready`: objects with no outstanding blockers
#[derive(Debug, Default)]
pub struct DepResolver {
    blocked_by: HashMap<ObjId, HashSet<ObjId>>,
    unblocks: HashMap<ObjId, HashSet<ObjId>>,
    ready: Vec<ObjId>,
}

impl DepResolver {
    /// Compute the initial state from the group arena.
    ///
    /// For every group with dependencies, the transitive closure of objects
    /// in its dependency groups becomes the blocker set of each of its
    /// objects. Groups without dependencies contribute their objects to the
    /// ready queue directly. A group encountered twice on the active
    /// traversal path is a circular reference.
    pub fn build(groups: &[ObjectGroup]) -> Result<Self> {
        let mut resolver = DepResolver::default();

        for group in groups.iter() {
            if group.depends.is_empty() {
                resolver.ready.extend(group.objects.iter().copied());
                continue;
            }

            let mut closure: HashSet<ObjId> = HashSet::new();
            let mut path: Vec<usize> = Vec::new();
            for &dep in group.depends.iter() {
                dive(groups, dep, &mut closure, &mut path)?;
            }

            // Dependency groups holding no objects leave nothing to wait for.
            if closure.is_empty() {
                resolver.ready.extend(group.objects.iter().copied());
                continue;
            }

            for &obj in group.objects.iter() {
                resolver
                    .blocked_by
                    .entry(obj)
                    .or_default()
                    .extend(closure.iter().copied());
            }
            for &blocker in closure.iter() {
                resolver
                    .unblocks
                    .entry(blocker)
                    .or_default()
                    .extend(group.objects.iter().copied());
            }
        }

        Ok(resolver)
    }

    /// Record that `obj` has completed, releasing its dependents.
    ///
    /// Dependents whose blocker set becomes empty move into the ready queue.
    /// Calling this for an object with no dependents is a no-op.
    pub fn mark_fulfilled(&mut self, obj: ObjId) {
        let Some(dependents) = self.unblocks.remove(&obj) else {
            return;
        };

        for dependent in dependents {
            if let Some(blockers) = self.blocked_by.get_mut(&dependent) {
                blockers.remove(&obj);
                if blockers.is_empty() {
                    self.blocked_by.remove(&dependent);
                    debug!(?dependent, "object unblocked");
                    self.ready.push(dependent);
                }
            }
        }
    }

    /// Take everything currently runnable, leaving the ready queue empty.
    pub fn take_ready(&mut self) -> Vec<ObjId> {
        std::mem::take(&mut self.ready)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn has_blocked(&self) -> bool {
        !self.blocked_by.is_empty()
    }

    /// True once both the ready queue and the blocked map are empty.
    pub fn is_drained(&self) -> bool {
        !self.has_ready() && !self.has_blocked()
    }

    /// Number of objects still waiting on blockers.
    pub fn blocked_len(&self) -> usize {
        self.blocked_by.len()
    }
}

/// Depth-first traversal over dependency groups, accumulating the object
/// closure. `path` tracks the groups on the active traversal path only;
/// diamond-shaped group graphs are fine, revisiting a group currently on
/// the path is not.
fn dive(
    groups: &[ObjectGroup],
    gi: usize,
    closure: &mut HashSet<ObjId>,
    path: &mut Vec<usize>,
) -> Result<()> {
    if path.contains(&gi) {
        return Err(BackdagError::CircularDependency(groups[gi].id.clone()));
    }
    path.push(gi);

    closure.extend(groups[gi].objects.iter().copied());
    for &dep in groups[gi].depends.iter() {
        dive(groups, dep, closure, path)?;
    }

    path.pop();
    Ok(())
}
