/// Identity types and defaults shared by groups and the registry.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ── Defaults ─────────────────────────────────────────────────────────────

/// Default heartbeat interval for leaf connections (1 minute).
pub const DEFAULT_HEART_CHECK: Duration = Duration::from_secs(60);

/// Default member capacity per group.
pub const DEFAULT_MAX_CONN_CNT: usize = 100;

/// Default hard ceiling on how long a member may stay registered (30 days).
pub const DEFAULT_MAX_CONN_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Missed heartbeat intervals before a connection is considered expired.
pub const HEARTBEAT_MISS_LIMIT: u32 = 2;

// ── GroupId ──────────────────────────────────────────────────────────────

/// Registry-wide group identifier. The empty id is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    /// Create a new random group ID ("grp-<uuid>").
    pub fn random() -> Self {
        Self(format!("grp-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── MemberId ─────────────────────────────────────────────────────────────

/// Identity of a member inside one group's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl AsRef<str> for MemberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── MessageKind ──────────────────────────────────────────────────────────

/// Kind of an inbound message handed to the hook chain.
///
/// Mirrors the frame opcodes of real-time transports; the registry never
/// interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

// ── Liveness ─────────────────────────────────────────────────────────────

/// Liveness of a leaf connection as seen by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liveness {
    /// Heard from within one heartbeat interval.
    Alive,
    /// Missed at least one heartbeat, not yet evictable.
    Stale,
    /// Past the miss limit or the lifetime ceiling.
    Expired,
}
