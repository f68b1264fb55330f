/// Per-group activity counters.
///
/// Counters are relaxed atomics: they are statistics, not synchronization.
/// [`GroupStats`] is a plain snapshot that serializes with serde.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::types::GroupId;

/// A monotonically increasing counter backed by [`AtomicU64`].
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct GroupCounters {
    pub(crate) added: Counter,
    pub(crate) removed: Counter,
    pub(crate) rejected: Counter,
    pub(crate) evicted: Counter,
    pub(crate) dispatched: Counter,
    pub(crate) hook_failures: Counter,
}

/// Point-in-time view of a group's size and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub group_id: GroupId,
    pub members: usize,
    pub capacity: usize,
    pub added: u64,
    pub removed: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub dispatched: u64,
    pub hook_failures: u64,
}

impl GroupCounters {
    pub(crate) fn snapshot(&self, group_id: GroupId, members: usize, capacity: usize) -> GroupStats {
        GroupStats {
            group_id,
            members,
            capacity,
            added: self.added.get(),
            removed: self.removed.get(),
            rejected: self.rejected.get(),
            evicted: self.evicted.get(),
            dispatched: self.dispatched.get(),
            hook_failures: self.hook_failures.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let c = Counter::new();
        c.inc();
        c.inc_by(4);
        assert_eq!(c.get(), 5);
        assert_eq!(format!("{c:?}"), "Counter(5)");
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let counters = GroupCounters::default();
        counters.added.inc_by(3);
        counters.rejected.inc();

        let stats = counters.snapshot(GroupId::from("lobby"), 3, 10);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["group_id"], "lobby");
        assert_eq!(json["added"], 3);
        assert_eq!(json["rejected"], 1);
        assert_eq!(json["capacity"], 10);
    }
}
