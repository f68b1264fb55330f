/// Group — a capacity-bounded map from member id to connection or sub-group.
///
/// Every read of the member count used for the capacity check happens under
/// the same write guard as the insert, so racing adds cannot overshoot the
/// capacity. No lock is held while calling hooks, handlers, the upgrader,
/// or `Connection::close`.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::connection::{Connection, UpgradeRequest, Upgrader};
use crate::error::GroupError;
use crate::member::{Member, MemberEntry};
use crate::options::{self, GroupConfig, GroupOption};
use crate::stats::{GroupCounters, GroupStats};
use crate::types::{GroupId, MemberId};

/// Serializes sub-group insertions so two crossing inserts (A into B, B into
/// A) cannot both pass the cycle check.
static NESTING: Mutex<()> = parking_lot::const_mutex(());

pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) config: GroupConfig,
    pub(crate) members: RwLock<HashMap<MemberId, MemberEntry>>,
    pub(crate) counters: GroupCounters,
}

impl Group {
    /// Build a group from options. Options are applied first-wins per field;
    /// defaults fill whatever is left unset.
    pub fn new(options: impl IntoIterator<Item = GroupOption>) -> Result<Self, GroupError> {
        let resolved = options::resolve(options)?;
        let now = Instant::now();
        let members = resolved
            .members
            .into_iter()
            .map(|(id, member)| (id, MemberEntry::new(member, now)))
            .collect();

        tracing::debug!(
            group_id = %resolved.id,
            capacity = resolved.config.max_conn_cnt,
            "group built"
        );

        Ok(Self {
            id: resolved.id,
            config: resolved.config,
            members: RwLock::new(members),
            counters: GroupCounters::default(),
        })
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Maximum simultaneous members.
    pub fn capacity(&self) -> usize {
        self.config.max_conn_cnt
    }

    pub fn heart_check(&self) -> Duration {
        self.config.heart_check
    }

    pub fn max_conn_duration(&self) -> Duration {
        self.config.max_conn_duration
    }

    pub fn upgrader(&self) -> &Arc<dyn Upgrader> {
        &self.config.upgrader
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.members.read().contains_key(id)
    }

    /// Snapshot of the member map. Handles are shared, not copied; the map
    /// itself is detached from later adds and removes.
    pub fn members(&self) -> HashMap<MemberId, Member> {
        self.members
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.member.clone()))
            .collect()
    }

    /// Member ids, sorted.
    pub fn member_ids(&self) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self.members.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> GroupStats {
        self.counters
            .snapshot(self.id.clone(), self.len(), self.capacity())
    }

    // ── Membership ───────────────────────────────────────────────────────

    /// Add a member under `id`.
    ///
    /// Fails with `MemberExists` if the id is taken (use
    /// [`replace_member`](Self::replace_member) to overwrite), and with
    /// `CapacityExceeded` once the group holds `capacity` members. A failed
    /// add leaves the map untouched.
    pub fn add_member(&self, id: impl Into<MemberId>, member: Member) -> Result<(), GroupError> {
        let id = id.into();
        let result = self.insert(&id, member, false).map(|_| ());
        if let Err(e) = &result {
            self.counters.rejected.inc();
            tracing::warn!(group_id = %self.id, member_id = %id, error = e.kind(), "add member failed: {e}");
        }
        result
    }

    /// Insert or overwrite `id`. Returns the previous handle, if any.
    ///
    /// Overwriting does not count against capacity; a new id does.
    pub fn replace_member(
        &self,
        id: impl Into<MemberId>,
        member: Member,
    ) -> Result<Option<Member>, GroupError> {
        let id = id.into();
        let result = self.insert(&id, member, true);
        if let Err(e) = &result {
            self.counters.rejected.inc();
            tracing::warn!(group_id = %self.id, member_id = %id, error = e.kind(), "replace member failed: {e}");
        }
        result
    }

    /// Remove `id`. A second removal of the same id fails with `NotFound`.
    pub fn remove_member(&self, id: &MemberId) -> Result<Member, GroupError> {
        let removed = self.members.write().remove(id);
        match removed {
            Some(entry) => {
                self.counters.removed.inc();
                tracing::debug!(group_id = %self.id, member_id = %id, "member removed");
                Ok(entry.member)
            }
            None => {
                let e = self.not_found(id);
                tracing::warn!(group_id = %self.id, member_id = %id, error = e.kind(), "remove member failed");
                Err(e)
            }
        }
    }

    /// Look up `id`. The returned handle shares the stored capability.
    pub fn get_member(&self, id: &MemberId) -> Result<Member, GroupError> {
        let found = self.members.read().get(id).map(|e| e.member.clone());
        found.ok_or_else(|| {
            let e = self.not_found(id);
            tracing::debug!(group_id = %self.id, member_id = %id, error = e.kind(), "get member failed");
            e
        })
    }

    /// Upgrade an inbound request with this group's upgrader and register
    /// the resulting connection under `request.member_id`.
    ///
    /// Capacity is checked before the upgrade so a full group never
    /// completes a handshake. If the add still fails (a racing add took the
    /// last slot, or the id is taken), the fresh connection is closed.
    pub async fn accept(&self, request: &UpgradeRequest) -> Result<Arc<dyn Connection>, GroupError> {
        let id = request.member_id.clone();
        if self.is_full() {
            let e = GroupError::CapacityExceeded {
                group_id: self.id.clone(),
                capacity: self.capacity(),
            };
            self.counters.rejected.inc();
            tracing::warn!(group_id = %self.id, member_id = %id, error = e.kind(), "accept refused");
            return Err(e);
        }

        let conn = self
            .config
            .upgrader
            .upgrade(request)
            .await
            .map_err(|source| {
                self.counters.rejected.inc();
                tracing::warn!(group_id = %self.id, member_id = %id, error = "upgrade", "upgrade failed: {source}");
                GroupError::Upgrade {
                    group_id: self.id.clone(),
                    id: id.clone(),
                    source,
                }
            })?;

        if let Err(e) = self.add_member(id.clone(), Member::Connection(conn.clone())) {
            if let Err(close_err) = conn.close() {
                tracing::debug!(member_id = %id, "closing rejected connection failed: {close_err}");
            }
            return Err(e);
        }
        Ok(conn)
    }

    // ── Nesting ──────────────────────────────────────────────────────────

    /// Whether `target` is reachable from this group through sub-group
    /// members (not counting this group itself).
    pub fn contains_group(&self, target: &Group) -> bool {
        let mut visited: HashSet<*const Group> = HashSet::new();
        let mut stack = self.subgroups();
        while let Some(group) = stack.pop() {
            let ptr = Arc::as_ptr(&group);
            if std::ptr::eq(ptr, target) {
                return true;
            }
            if visited.insert(ptr) {
                stack.extend(group.subgroups());
            }
        }
        false
    }

    /// Every leaf connection in the tree rooted here, with the member-id
    /// path that leads to it. Each sub-group is visited once.
    pub fn leaf_connections(&self) -> Vec<(Vec<MemberId>, Arc<dyn Connection>)> {
        let mut out = Vec::new();
        let mut visited: HashSet<*const Group> = HashSet::new();
        visited.insert(self as *const Group);
        self.collect_leaves(&mut Vec::new(), &mut visited, &mut out);
        out
    }

    fn collect_leaves(
        &self,
        path: &mut Vec<MemberId>,
        visited: &mut HashSet<*const Group>,
        out: &mut Vec<(Vec<MemberId>, Arc<dyn Connection>)>,
    ) {
        let mut entries: Vec<(MemberId, Member)> = self.members().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, member) in entries {
            path.push(id);
            match member {
                Member::Connection(conn) => out.push((path.clone(), conn)),
                Member::SubGroup(group) => {
                    if visited.insert(Arc::as_ptr(&group)) {
                        group.collect_leaves(path, visited, out);
                    }
                }
            }
            path.pop();
        }
    }

    pub(crate) fn subgroups(&self) -> Vec<Arc<Group>> {
        self.members
            .read()
            .values()
            .filter_map(|e| e.member.as_group().cloned())
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn insert(
        &self,
        id: &MemberId,
        member: Member,
        overwrite: bool,
    ) -> Result<Option<Member>, GroupError> {
        if id.as_str().is_empty() {
            return Err(GroupError::invalid("member id must not be empty"));
        }

        match &member {
            Member::Connection(conn) => {
                if conn.is_closed() {
                    return Err(GroupError::invalid(format!(
                        "connection {} is already closed",
                        conn.id()
                    )));
                }
                self.insert_locked(id, member, overwrite)
            }
            Member::SubGroup(sub) => {
                let _nesting = NESTING.lock();
                if std::ptr::eq(Arc::as_ptr(sub), self) || sub.contains_group(self) {
                    return Err(GroupError::NestingCycle {
                        group_id: self.id.clone(),
                        subgroup_id: sub.id.clone(),
                    });
                }
                self.insert_locked(id, member, overwrite)
            }
        }
    }

    fn insert_locked(
        &self,
        id: &MemberId,
        member: Member,
        overwrite: bool,
    ) -> Result<Option<Member>, GroupError> {
        let now = Instant::now();
        let mut members = self.members.write();

        if let Some(existing) = members.get_mut(id) {
            if !overwrite {
                return Err(GroupError::MemberExists {
                    group_id: self.id.clone(),
                    id: id.clone(),
                });
            }
            let previous = std::mem::replace(existing, MemberEntry::new(member, now));
            drop(members);
            self.counters.added.inc();
            tracing::debug!(group_id = %self.id, member_id = %id, "member replaced");
            return Ok(Some(previous.member));
        }

        if members.len() >= self.config.max_conn_cnt {
            return Err(GroupError::CapacityExceeded {
                group_id: self.id.clone(),
                capacity: self.config.max_conn_cnt,
            });
        }

        members.insert(id.clone(), MemberEntry::new(member, now));
        let size = members.len();
        drop(members);

        self.counters.added.inc();
        tracing::debug!(group_id = %self.id, member_id = %id, size, "member added");
        Ok(None)
    }

    pub(crate) fn not_found(&self, id: &MemberId) -> GroupError {
        GroupError::NotFound {
            group_id: self.id.clone(),
            id: Some(id.clone()),
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("members", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LoopbackConnection;
    use crate::options::{with_group_id, with_max_conn_cnt, with_upgrader};

    fn conn(id: &str) -> Member {
        Member::connection(LoopbackConnection::new(id))
    }

    fn group(id: &str, capacity: usize) -> Group {
        Group::new([with_group_id(id), with_max_conn_cnt(capacity)]).unwrap()
    }

    #[test]
    fn add_get_remove() {
        let g = group("lobby", 10);
        g.add_member("alice", conn("c1")).unwrap();

        let member = g.get_member(&"alice".into()).unwrap();
        assert_eq!(member.as_connection().map(|c| c.id()), Some("c1"));
        assert_eq!(g.len(), 1);

        g.remove_member(&"alice".into()).unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn get_returns_shared_handle() {
        let g = group("lobby", 10);
        let original = conn("c1");
        g.add_member("alice", original.clone()).unwrap();
        assert!(g.get_member(&"alice".into()).unwrap().same_as(&original));
    }

    #[test]
    fn capacity_boundary_is_exact() {
        let g = group("lobby", 2);
        g.add_member("a", conn("1")).unwrap();
        g.add_member("b", conn("2")).unwrap();

        let err = g.add_member("c", conn("3")).unwrap_err();
        assert!(matches!(err, GroupError::CapacityExceeded { capacity: 2, .. }));
        assert_eq!(g.len(), 2);
        assert!(!g.contains(&"c".into()));
    }

    #[test]
    fn duplicate_id_is_rejected_without_overwrite() {
        let g = group("lobby", 10);
        let first = conn("c1");
        g.add_member("alice", first.clone()).unwrap();

        let err = g.add_member("alice", conn("c2")).unwrap_err();
        assert!(matches!(err, GroupError::MemberExists { .. }));
        assert!(g.get_member(&"alice".into()).unwrap().same_as(&first));
    }

    #[test]
    fn replace_overwrites_and_returns_previous() {
        let g = group("lobby", 1);
        let first = conn("c1");
        g.add_member("alice", first.clone()).unwrap();

        // Full group, but replacing an existing id does not need a slot.
        let previous = g.replace_member("alice", conn("c2")).unwrap();
        assert!(previous.unwrap().same_as(&first));
        assert_eq!(g.len(), 1);

        let err = g.replace_member("bob", conn("c3")).unwrap_err();
        assert!(matches!(err, GroupError::CapacityExceeded { .. }));
    }

    #[test]
    fn second_remove_is_not_found() {
        let g = group("lobby", 10);
        g.add_member("alice", conn("c1")).unwrap();
        g.remove_member(&"alice".into()).unwrap();

        let err = g.remove_member(&"alice".into()).unwrap_err();
        assert!(matches!(err, GroupError::NotFound { id: Some(_), .. }));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let g = group("lobby", 10);
        assert!(matches!(
            g.get_member(&"ghost".into()),
            Err(GroupError::NotFound { .. })
        ));
    }

    #[test]
    fn empty_id_and_closed_connection_are_invalid() {
        let g = group("lobby", 10);
        assert!(matches!(
            g.add_member("", conn("c1")),
            Err(GroupError::InvalidArgument { .. })
        ));

        let closed = LoopbackConnection::new("c2");
        closed.close().unwrap();
        assert!(matches!(
            g.add_member("bob", Member::connection(closed)),
            Err(GroupError::InvalidArgument { .. })
        ));
        assert!(g.is_empty());
    }

    #[test]
    fn members_is_a_detached_snapshot() {
        let g = group("lobby", 10);
        g.add_member("a", conn("1")).unwrap();
        let snapshot = g.members();
        g.add_member("b", conn("2")).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(g.member_ids(), vec![MemberId::from("a"), MemberId::from("b")]);
    }

    #[test]
    fn subgroup_self_insert_is_a_cycle() {
        let g = Arc::new(group("root", 10));
        let err = g.add_member("me", Member::SubGroup(g.clone())).unwrap_err();
        assert!(matches!(err, GroupError::NestingCycle { .. }));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let a = Arc::new(group("a", 10));
        let b = Arc::new(group("b", 10));
        let c = Arc::new(group("c", 10));

        a.add_member("b", Member::SubGroup(b.clone())).unwrap();
        b.add_member("c", Member::SubGroup(c.clone())).unwrap();

        assert!(a.contains_group(&c));
        let err = c.add_member("a", Member::SubGroup(a.clone())).unwrap_err();
        assert!(matches!(err, GroupError::NestingCycle { .. }));
    }

    #[test]
    fn shared_subgroup_is_not_a_cycle() {
        // Diamond: root → left → shared, root → right → shared.
        let root = Arc::new(group("root", 10));
        let left = Arc::new(group("left", 10));
        let right = Arc::new(group("right", 10));
        let shared = Arc::new(group("shared", 10));
        shared.add_member("x", conn("cx")).unwrap();

        left.add_member("s", Member::SubGroup(shared.clone())).unwrap();
        right.add_member("s", Member::SubGroup(shared.clone())).unwrap();
        root.add_member("l", Member::SubGroup(left)).unwrap();
        root.add_member("r", Member::SubGroup(right)).unwrap();

        // Shared group is visited once.
        let leaves = root.leaf_connections();
        assert_eq!(leaves.len(), 1);
        let path: Vec<&str> = leaves[0].0.iter().map(|m| m.as_str()).collect();
        assert_eq!(path, vec!["l", "s", "x"]);
    }

    #[tokio::test]
    async fn accept_registers_upgraded_connection() {
        let g = Group::new([
            with_group_id("lobby"),
            with_max_conn_cnt(1),
            with_upgrader(crate::connection::LoopbackUpgrader),
        ])
        .unwrap();

        let conn = g.accept(&UpgradeRequest::new("alice")).await.unwrap();
        assert_eq!(conn.id(), "loopback:alice");
        assert!(g.contains(&"alice".into()));

        let err = g.accept(&UpgradeRequest::new("bob")).await.err().unwrap();
        assert!(matches!(err, GroupError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn accept_closes_connection_on_duplicate_id() {
        let g = group("lobby", 10);
        g.accept(&UpgradeRequest::new("alice")).await.unwrap();
        let err = g.accept(&UpgradeRequest::new("alice")).await.err().unwrap();
        assert!(matches!(err, GroupError::MemberExists { .. }));
        assert_eq!(g.stats().rejected, 1);
    }

    #[test]
    fn stats_track_activity() {
        let g = group("lobby", 1);
        g.add_member("a", conn("1")).unwrap();
        let _ = g.add_member("b", conn("2"));
        g.remove_member(&"a".into()).unwrap();

        let stats = g.stats();
        assert_eq!(stats.added, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.members, 0);
        assert_eq!(stats.capacity, 1);
    }
}
