/// Hook chain around inbound message dispatch.
///
/// For a message from member `id`: the before-hook runs first and can veto
/// the message; then the caller's handler; then the after-hook. Failures are
/// returned to the caller, never logged or swallowed here, and nothing
/// already applied is rolled back. A missing hook is a no-op.
use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;

use crate::error::GroupError;
use crate::group::Group;
use crate::member::Member;
use crate::types::{GroupId, MemberId, MessageKind};

/// Hook signature: `(context, member id, message kind, payload)`.
pub type HandleHook =
    Arc<dyn Fn(&HookContext, &MemberId, MessageKind, &[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Per-dispatch context handed to hooks.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub group_id: GroupId,
    pub received_at: Instant,
}

impl HookContext {
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            received_at: Instant::now(),
        }
    }
}

impl Group {
    /// Context for a message received now by this group.
    pub fn hook_context(&self) -> HookContext {
        HookContext::new(self.id.clone())
    }

    /// Run `handler` for a message from `id`, wrapped by the group's hooks.
    ///
    /// The member must be present (`NotFound` otherwise); a dispatch counts
    /// as a heartbeat for it. The handler receives the stored handle.
    pub async fn dispatch<F, Fut, T>(
        &self,
        ctx: &HookContext,
        id: &MemberId,
        kind: MessageKind,
        payload: &[u8],
        handler: F,
    ) -> Result<T, GroupError>
    where
        F: FnOnce(Member) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let member = self.touch(id, Instant::now())?;

        if let Some(hook) = &self.config.before_handle {
            hook(ctx, id, kind, payload).map_err(|source| {
                self.counters.hook_failures.inc();
                GroupError::PreHandle {
                    id: id.clone(),
                    source,
                }
            })?;
        }

        let output = handler(member)
            .await
            .map_err(|source| GroupError::Handler {
                id: id.clone(),
                source,
            })?;

        if let Some(hook) = &self.config.after_handle {
            hook(ctx, id, kind, payload).map_err(|source| {
                self.counters.hook_failures.inc();
                GroupError::PostHandle {
                    id: id.clone(),
                    source,
                }
            })?;
        }

        self.counters.dispatched.inc();
        Ok(output)
    }
}
