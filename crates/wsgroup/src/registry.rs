/// GroupRegistry — table of registered groups keyed by group id.
///
/// An explicit value rather than process-global state: construct one with
/// [`GroupRegistry::new`] and pass it (usually as `Arc<GroupRegistry>`) to
/// whatever accepts connections. The registry shares groups, it never copies
/// them; a group stays alive as long as the registry or any parent group
/// holds it.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::error::GroupError;
use crate::group::Group;
use crate::stats::GroupStats;
use crate::sweep::Eviction;
use crate::types::GroupId;

#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<GroupId, Arc<Group>>>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `group` under its id. Fails with `DuplicateId` if the id is
    /// taken; the existing registration is left untouched.
    pub fn register(&self, group: Arc<Group>) -> Result<(), GroupError> {
        let mut groups = self.groups.write();
        if groups.contains_key(group.id()) {
            drop(groups);
            let e = GroupError::DuplicateId {
                group_id: group.id().clone(),
            };
            tracing::warn!(group_id = %group.id(), error = e.kind(), "register group failed");
            return Err(e);
        }
        groups.insert(group.id().clone(), group.clone());
        let count = groups.len();
        drop(groups);

        tracing::debug!(group_id = %group.id(), count, "group registered");
        Ok(())
    }

    /// Remove the group registered under `id` and hand it back.
    pub fn deregister(&self, id: &GroupId) -> Result<Arc<Group>, GroupError> {
        let removed = self.groups.write().remove(id);
        match removed {
            Some(group) => {
                tracing::debug!(group_id = %id, "group deregistered");
                Ok(group)
            }
            None => {
                let e = GroupError::NotFound {
                    group_id: id.clone(),
                    id: None,
                };
                tracing::warn!(group_id = %id, error = e.kind(), "deregister group failed");
                Err(e)
            }
        }
    }

    pub fn get(&self, id: &GroupId) -> Option<Arc<Group>> {
        self.groups.read().get(id).cloned()
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.groups.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Registered ids, sorted.
    pub fn group_ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<GroupId> = self.groups.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of the registered groups.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        self.groups.read().values().cloned().collect()
    }

    pub fn stats(&self) -> Vec<GroupStats> {
        let mut stats: Vec<GroupStats> = self.groups().iter().map(|g| g.stats()).collect();
        stats.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        stats
    }

    /// Sweep every registered group and every group nested below one, each
    /// under its own policy and at most once. The registry lock is released
    /// before any group is swept.
    pub fn sweep_at(&self, now: Instant) -> Vec<Eviction> {
        let mut visited: HashSet<*const Group> = HashSet::new();
        let mut stack = self.groups();
        let mut evictions = Vec::new();
        while let Some(group) = stack.pop() {
            if !visited.insert(Arc::as_ptr(&group)) {
                continue;
            }
            evictions.extend(group.sweep_at(now));
            stack.extend(group.subgroups());
        }
        evictions
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.group_ids())
            .finish()
    }
}
