//! Connection-group registry.
//!
//! Named groups of live connections under a shared identity namespace:
//! capacity-bounded membership, nested groups (a member may itself be a
//! group), liveness sweeps, and a before/after hook chain around inbound
//! message dispatch. Safe under concurrent access from many
//! connection-handling tasks.
//!
//! The transport is abstract: groups store [`Connection`] capabilities and
//! obtain new ones through an [`Upgrader`]. Message delivery is up to the
//! caller once it has a handle.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use wsgroup::{
//!     with_group_id, with_max_conn_cnt, Group, GroupError, GroupRegistry, LoopbackConnection,
//!     Member,
//! };
//!
//! let registry = GroupRegistry::new();
//! let lobby = Arc::new(Group::new([with_group_id("lobby"), with_max_conn_cnt(2)])?);
//! registry.register(lobby.clone())?;
//!
//! lobby.add_member("alice", Member::connection(LoopbackConnection::new("c1")))?;
//! lobby.add_member("bob", Member::connection(LoopbackConnection::new("c2")))?;
//! assert!(matches!(
//!     lobby.add_member("carol", Member::connection(LoopbackConnection::new("c3"))),
//!     Err(GroupError::CapacityExceeded { .. })
//! ));
//! # Ok::<(), GroupError>(())
//! ```

pub mod connection;
pub mod error;
pub mod group;
pub mod hook;
pub mod member;
pub mod options;
pub mod registry;
pub mod stats;
pub mod sweep;
pub mod types;

pub use connection::{Connection, LoopbackConnection, LoopbackUpgrader, UpgradeRequest, Upgrader};
pub use error::GroupError;
pub use group::Group;
pub use hook::{HandleHook, HookContext};
pub use member::Member;
pub use options::{
    default_options, with_after_handle, with_before_handle, with_group_id, with_group_map,
    with_heart_check, with_max_conn_cnt, with_max_conn_duration, with_upgrader, GroupConfig,
    GroupOption,
};
pub use registry::GroupRegistry;
pub use stats::{Counter, GroupStats};
pub use sweep::{Eviction, EvictionReason, Sweeper, SweeperConfig, SweeperHandle};
pub use types::{
    GroupId, Liveness, MemberId, MessageKind, DEFAULT_HEART_CHECK, DEFAULT_MAX_CONN_CNT,
    DEFAULT_MAX_CONN_DURATION, HEARTBEAT_MISS_LIMIT,
};
