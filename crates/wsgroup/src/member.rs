/// Member handles stored in a group.
use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::connection::Connection;
use crate::group::Group;

/// What a member id points to: a live connection or a nested group.
///
/// Cloning a `Member` clones the `Arc`, never the underlying capability.
/// A sub-group reference shares ownership; the nested group stays owned by
/// whoever created it.
#[derive(Clone)]
pub enum Member {
    Connection(Arc<dyn Connection>),
    SubGroup(Arc<Group>),
}

impl Member {
    pub fn connection(conn: impl Connection) -> Self {
        Member::Connection(Arc::new(conn))
    }

    pub fn as_connection(&self) -> Option<&Arc<dyn Connection>> {
        match self {
            Member::Connection(c) => Some(c),
            Member::SubGroup(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            Member::Connection(_) => None,
            Member::SubGroup(g) => Some(g),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Member::SubGroup(_))
    }

    /// Whether both handles refer to the same underlying object.
    pub fn same_as(&self, other: &Member) -> bool {
        match (self, other) {
            (Member::Connection(a), Member::Connection(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Member::SubGroup(a), Member::SubGroup(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Connection(c) => f.debug_tuple("Connection").field(&c.id()).finish(),
            Member::SubGroup(g) => f.debug_tuple("SubGroup").field(g.id()).finish(),
        }
    }
}

impl From<Arc<Group>> for Member {
    fn from(group: Arc<Group>) -> Self {
        Member::SubGroup(group)
    }
}

impl From<Arc<dyn Connection>> for Member {
    fn from(conn: Arc<dyn Connection>) -> Self {
        Member::Connection(conn)
    }
}

/// A stored member plus the timestamps the sweep needs.
#[derive(Clone)]
pub(crate) struct MemberEntry {
    pub(crate) member: Member,
    pub(crate) joined_at: Instant,
    pub(crate) last_seen: Instant,
}

impl MemberEntry {
    pub(crate) fn new(member: Member, now: Instant) -> Self {
        Self {
            member,
            joined_at: now,
            last_seen: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LoopbackConnection;

    #[test]
    fn clone_shares_the_connection() {
        let member = Member::connection(LoopbackConnection::new("c1"));
        let copy = member.clone();
        assert!(member.same_as(&copy));

        let other = Member::connection(LoopbackConnection::new("c1"));
        assert!(!member.same_as(&other));
    }

    #[test]
    fn variant_accessors() {
        let member = Member::connection(LoopbackConnection::new("c1"));
        assert!(!member.is_group());
        assert!(member.as_group().is_none());
        assert_eq!(member.as_connection().map(|c| c.id()), Some("c1"));

        let group = Arc::new(Group::new([]).unwrap());
        let member = Member::from(group.clone());
        assert!(member.is_group());
        assert!(Arc::ptr_eq(member.as_group().unwrap(), &group));
    }

    #[test]
    fn debug_names_the_variant() {
        let member = Member::connection(LoopbackConnection::new("c1"));
        assert_eq!(format!("{member:?}"), "Connection(\"c1\")");
    }
}
