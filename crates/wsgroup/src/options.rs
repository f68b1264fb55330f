/// Group construction from an ordered list of options.
///
/// Each option sets exactly one field. The first option that targets a
/// field wins; later options for the same field are ignored. The default
/// options are appended after the caller's, so they only fill fields the
/// caller left unset.
///
/// ```rust
/// use std::time::Duration;
/// use wsgroup::{with_group_id, with_max_conn_cnt, Group};
///
/// let group = Group::new([
///     with_group_id("lobby"),
///     with_max_conn_cnt(2),
///     with_max_conn_cnt(50), // ignored: capacity already set
/// ])
/// .unwrap();
/// assert_eq!(group.capacity(), 2);
/// assert_eq!(group.heart_check(), Duration::from_secs(60));
/// ```
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, LoopbackUpgrader, Upgrader};
use crate::error::GroupError;
use crate::hook::HandleHook;
use crate::member::Member;
use crate::types::{
    GroupId, MemberId, DEFAULT_HEART_CHECK, DEFAULT_MAX_CONN_CNT, DEFAULT_MAX_CONN_DURATION,
};

/// A single field-setting option.
pub enum GroupOption {
    Upgrader(Arc<dyn Upgrader>),
    GroupId(GroupId),
    HeartCheck(Duration),
    MaxConnCnt(usize),
    MaxConnDuration(Duration),
    GroupMap(HashMap<MemberId, Member>),
    BeforeHandle(HandleHook),
    AfterHandle(HandleHook),
}

impl GroupOption {
    fn field(&self) -> &'static str {
        match self {
            GroupOption::Upgrader(_) => "upgrader",
            GroupOption::GroupId(_) => "group_id",
            GroupOption::HeartCheck(_) => "heart_check",
            GroupOption::MaxConnCnt(_) => "max_conn_cnt",
            GroupOption::MaxConnDuration(_) => "max_conn_duration",
            GroupOption::GroupMap(_) => "group_map",
            GroupOption::BeforeHandle(_) => "before_handle",
            GroupOption::AfterHandle(_) => "after_handle",
        }
    }
}

impl fmt::Debug for GroupOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupOption").field(&self.field()).finish()
    }
}

pub fn with_upgrader(upgrader: impl Upgrader + 'static) -> GroupOption {
    GroupOption::Upgrader(Arc::new(upgrader))
}

pub fn with_group_id(id: impl Into<GroupId>) -> GroupOption {
    GroupOption::GroupId(id.into())
}

pub fn with_heart_check(interval: Duration) -> GroupOption {
    GroupOption::HeartCheck(interval)
}

pub fn with_max_conn_cnt(capacity: usize) -> GroupOption {
    GroupOption::MaxConnCnt(capacity)
}

pub fn with_max_conn_duration(lifetime: Duration) -> GroupOption {
    GroupOption::MaxConnDuration(lifetime)
}

/// Seed the group with initial members. Counted against capacity.
pub fn with_group_map(members: HashMap<MemberId, Member>) -> GroupOption {
    GroupOption::GroupMap(members)
}

pub fn with_before_handle<F>(hook: F) -> GroupOption
where
    F: Fn(&crate::HookContext, &MemberId, crate::MessageKind, &[u8]) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
{
    GroupOption::BeforeHandle(Arc::new(hook))
}

pub fn with_after_handle<F>(hook: F) -> GroupOption
where
    F: Fn(&crate::HookContext, &MemberId, crate::MessageKind, &[u8]) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
{
    GroupOption::AfterHandle(Arc::new(hook))
}

/// Options appended after the caller's on every build.
pub fn default_options() -> Vec<GroupOption> {
    vec![
        with_upgrader(LoopbackUpgrader),
        with_group_id(""),
        with_heart_check(DEFAULT_HEART_CHECK),
        with_max_conn_cnt(DEFAULT_MAX_CONN_CNT),
        with_max_conn_duration(DEFAULT_MAX_CONN_DURATION),
        with_group_map(HashMap::new()),
    ]
}

// ── Resolved configuration ───────────────────────────────────────────────

/// Fixed configuration of a built group.
#[derive(Clone)]
pub struct GroupConfig {
    pub(crate) upgrader: Arc<dyn Upgrader>,
    pub(crate) heart_check: Duration,
    pub(crate) max_conn_cnt: usize,
    pub(crate) max_conn_duration: Duration,
    pub(crate) before_handle: Option<HandleHook>,
    pub(crate) after_handle: Option<HandleHook>,
}

impl fmt::Debug for GroupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupConfig")
            .field("heart_check", &self.heart_check)
            .field("max_conn_cnt", &self.max_conn_cnt)
            .field("max_conn_duration", &self.max_conn_duration)
            .field("before_handle", &self.before_handle.is_some())
            .field("after_handle", &self.after_handle.is_some())
            .finish()
    }
}

/// Output of [`resolve`]: everything a `Group` is built from.
pub(crate) struct Resolved {
    pub(crate) id: GroupId,
    pub(crate) config: GroupConfig,
    pub(crate) members: HashMap<MemberId, Member>,
}

/// Draft where every field starts unset. A setter only writes a field that
/// is still `None`.
#[derive(Default)]
struct Draft {
    upgrader: Option<Arc<dyn Upgrader>>,
    id: Option<GroupId>,
    heart_check: Option<Duration>,
    max_conn_cnt: Option<usize>,
    max_conn_duration: Option<Duration>,
    members: Option<HashMap<MemberId, Member>>,
    before_handle: Option<HandleHook>,
    after_handle: Option<HandleHook>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &'static str) {
    if slot.is_some() {
        tracing::trace!(field, "option already set, ignoring");
        return;
    }
    *slot = Some(value);
}

impl Draft {
    fn apply(&mut self, option: GroupOption) {
        let field = option.field();
        match option {
            GroupOption::Upgrader(v) => set_once(&mut self.upgrader, v, field),
            GroupOption::GroupId(v) => set_once(&mut self.id, v, field),
            GroupOption::HeartCheck(v) => set_once(&mut self.heart_check, v, field),
            GroupOption::MaxConnCnt(v) => set_once(&mut self.max_conn_cnt, v, field),
            GroupOption::MaxConnDuration(v) => set_once(&mut self.max_conn_duration, v, field),
            GroupOption::GroupMap(v) => set_once(&mut self.members, v, field),
            GroupOption::BeforeHandle(v) => set_once(&mut self.before_handle, v, field),
            GroupOption::AfterHandle(v) => set_once(&mut self.after_handle, v, field),
        }
    }
}

/// Apply caller options, then defaults, and validate the result.
pub(crate) fn resolve(
    options: impl IntoIterator<Item = GroupOption>,
) -> Result<Resolved, GroupError> {
    let mut draft = Draft::default();
    for option in options.into_iter().chain(default_options()) {
        draft.apply(option);
    }

    // Defaults have set every field by now.
    let id = draft.id.unwrap_or_default();
    let members = draft.members.unwrap_or_default();
    let upgrader = draft
        .upgrader
        .unwrap_or_else(|| Arc::new(LoopbackUpgrader) as Arc<dyn Upgrader>);
    let heart_check = draft.heart_check.unwrap_or(DEFAULT_HEART_CHECK);
    let max_conn_cnt = draft.max_conn_cnt.unwrap_or(DEFAULT_MAX_CONN_CNT);
    let max_conn_duration = draft.max_conn_duration.unwrap_or(DEFAULT_MAX_CONN_DURATION);

    if max_conn_cnt == 0 {
        return Err(GroupError::invalid("max_conn_cnt must be greater than zero"));
    }
    if heart_check.is_zero() {
        return Err(GroupError::invalid("heart_check must be non-zero"));
    }
    if max_conn_duration.is_zero() {
        return Err(GroupError::invalid("max_conn_duration must be non-zero"));
    }
    if members.len() > max_conn_cnt {
        return Err(GroupError::invalid(format!(
            "initial group map holds {} members, capacity is {max_conn_cnt}",
            members.len()
        )));
    }
    if let Some(id) = members.keys().find(|id| id.as_str().is_empty()) {
        return Err(GroupError::invalid(format!("empty member id in group map: {id:?}")));
    }
    if let Some((id, _)) = members
        .iter()
        .find(|(_, m)| m.as_connection().is_some_and(|c| c.is_closed()))
    {
        return Err(GroupError::invalid(format!(
            "closed connection in group map under {id}"
        )));
    }

    Ok(Resolved {
        id,
        config: GroupConfig {
            upgrader,
            heart_check,
            max_conn_cnt,
            max_conn_duration,
            before_handle: draft.before_handle,
            after_handle: draft.after_handle,
        },
        members,
    })
}
