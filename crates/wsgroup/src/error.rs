use crate::types::{GroupId, MemberId};

/// Errors returned by groups and the group registry.
///
/// All variants are local and recoverable. Nothing here is retried
/// internally; the caller decides what to do with a full group or an
/// unknown id.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("group {group_id} is full (capacity {capacity})")]
    CapacityExceeded { group_id: GroupId, capacity: usize },

    /// `id` is `None` when the group itself is missing from the registry.
    #[error("{}", not_found_message(.group_id, .id))]
    NotFound {
        group_id: GroupId,
        id: Option<MemberId>,
    },

    #[error("group id {group_id} is already registered")]
    DuplicateId { group_id: GroupId },

    #[error("member {id} already present in group {group_id}")]
    MemberExists { group_id: GroupId, id: MemberId },

    #[error("adding group {subgroup_id} to {group_id} would create a nesting cycle")]
    NestingCycle {
        group_id: GroupId,
        subgroup_id: GroupId,
    },

    #[error("upgrade of {id} into group {group_id} failed: {source}")]
    Upgrade {
        group_id: GroupId,
        id: MemberId,
        #[source]
        source: anyhow::Error,
    },

    #[error("pre-handle hook rejected message from {id}: {source}")]
    PreHandle {
        id: MemberId,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler failed for message from {id}: {source}")]
    Handler {
        id: MemberId,
        #[source]
        source: anyhow::Error,
    },

    #[error("post-handle hook failed for message from {id}: {source}")]
    PostHandle {
        id: MemberId,
        #[source]
        source: anyhow::Error,
    },
}

impl GroupError {
    /// Stable identifier for the error kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            GroupError::InvalidArgument { .. } => "invalid_argument",
            GroupError::CapacityExceeded { .. } => "capacity_exceeded",
            GroupError::NotFound { .. } => "not_found",
            GroupError::DuplicateId { .. } => "duplicate_id",
            GroupError::MemberExists { .. } => "member_exists",
            GroupError::NestingCycle { .. } => "nesting_cycle",
            GroupError::Upgrade { .. } => "upgrade",
            GroupError::PreHandle { .. } => "pre_handle",
            GroupError::Handler { .. } => "handler",
            GroupError::PostHandle { .. } => "post_handle",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        GroupError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

fn not_found_message(group_id: &GroupId, id: &Option<MemberId>) -> String {
    match id {
        Some(id) => format!("member {id} not found in group {group_id}"),
        None => format!("group {group_id} is not registered"),
    }
}
