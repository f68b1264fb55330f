/// Liveness tracking and the periodic eviction sweep.
///
/// Only leaf connections are subject to liveness. A connection is `Stale`
/// after one missed heartbeat interval and `Expired` after
/// `HEARTBEAT_MISS_LIMIT` intervals, or once it has been registered longer
/// than the group's max member lifetime, whatever its activity.
///
/// The sweep removes expired entries under the group's write lock (same
/// discipline as `remove_member`), then closes them with the lock released.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::GroupError;
use crate::group::Group;
use crate::member::{Member, MemberEntry};
use crate::registry::GroupRegistry;
use crate::types::{GroupId, Liveness, MemberId, HEARTBEAT_MISS_LIMIT};

/// Default sweep period.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Environment variable overriding the sweep period, in milliseconds.
pub const SWEEP_INTERVAL_ENV: &str = "WSGROUP_SWEEP_INTERVAL_MS";

/// Why a member was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvictionReason {
    HeartbeatTimeout,
    LifetimeExceeded,
}

/// A member removed by the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub reason: EvictionReason,
}

fn evaluate(
    entry: &MemberEntry,
    now: Instant,
    heart_check: Duration,
    lifetime: Duration,
) -> (Liveness, Option<EvictionReason>) {
    if entry.member.is_group() {
        return (Liveness::Alive, None);
    }
    if now.saturating_duration_since(entry.joined_at) >= lifetime {
        return (Liveness::Expired, Some(EvictionReason::LifetimeExceeded));
    }
    let silent = now.saturating_duration_since(entry.last_seen);
    let timeout = heart_check.saturating_mul(HEARTBEAT_MISS_LIMIT);
    if silent >= timeout {
        (Liveness::Expired, Some(EvictionReason::HeartbeatTimeout))
    } else if silent >= heart_check {
        (Liveness::Stale, None)
    } else {
        (Liveness::Alive, None)
    }
}

impl Group {
    /// Record a heartbeat from `id`.
    pub fn record_heartbeat(&self, id: &MemberId) -> Result<(), GroupError> {
        self.touch(id, Instant::now()).map(|_| ())
    }

    /// Record a heartbeat with a specific timestamp (for testing).
    pub fn record_heartbeat_at(&self, id: &MemberId, now: Instant) -> Result<(), GroupError> {
        self.touch(id, now).map(|_| ())
    }

    /// Refresh `last_seen` and return the stored handle.
    pub(crate) fn touch(&self, id: &MemberId, now: Instant) -> Result<Member, GroupError> {
        let mut members = self.members.write();
        match members.get_mut(id) {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(now);
                Ok(entry.member.clone())
            }
            None => {
                drop(members);
                let e = self.not_found(id);
                tracing::debug!(group_id = %self.id, member_id = %id, error = e.kind(), "heartbeat for unknown member");
                Err(e)
            }
        }
    }

    pub fn liveness(&self, id: &MemberId) -> Result<Liveness, GroupError> {
        self.liveness_at(id, Instant::now())
    }

    /// Liveness of `id` at a specific time (for testing).
    pub fn liveness_at(&self, id: &MemberId, now: Instant) -> Result<Liveness, GroupError> {
        let members = self.members.read();
        let entry = members.get(id).ok_or_else(|| self.not_found(id))?;
        Ok(evaluate(entry, now, self.config.heart_check, self.config.max_conn_duration).0)
    }

    pub fn sweep(&self) -> Vec<Eviction> {
        self.sweep_at(Instant::now())
    }

    /// Remove and close every expired connection in this group. Sub-groups
    /// are never evicted, nor swept; [`GroupRegistry::sweep_at`] walks them.
    pub fn sweep_at(&self, now: Instant) -> Vec<Eviction> {
        let heart_check = self.config.heart_check;
        let lifetime = self.config.max_conn_duration;

        let mut expired: Vec<(MemberId, Member, EvictionReason)> = Vec::new();
        self.members.write().retain(|id, entry| {
            match evaluate(entry, now, heart_check, lifetime).1 {
                Some(reason) => {
                    expired.push((id.clone(), entry.member.clone(), reason));
                    false
                }
                None => true,
            }
        });

        if expired.is_empty() {
            return Vec::new();
        }
        self.counters.evicted.inc_by(expired.len() as u64);

        expired
            .into_iter()
            .map(|(member_id, member, reason)| {
                tracing::info!(group_id = %self.id, member_id = %member_id, ?reason, "member evicted");
                if let Member::Connection(conn) = &member {
                    if let Err(e) = conn.close() {
                        tracing::debug!(member_id = %member_id, "close after eviction failed: {e}");
                    }
                }
                Eviction {
                    group_id: self.id.clone(),
                    member_id,
                    reason,
                }
            })
            .collect()
    }
}

// ── Sweeper task ─────────────────────────────────────────────────────────

/// Configuration for the background sweeper.
///
/// ```rust
/// use std::time::Duration;
/// use wsgroup::SweeperConfig;
///
/// let config = SweeperConfig::new()
///     .interval(Duration::from_secs(1))
///     .event_buffer(64);
/// ```
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub(crate) interval: Duration,
    pub(crate) event_buffer: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SweeperConfig {
    /// Create a config with defaults.
    ///
    /// If `WSGROUP_SWEEP_INTERVAL_MS` is set to a positive integer, it is
    /// used as the sweep period. This can be overridden with
    /// [`.interval()`](Self::interval).
    pub fn new() -> Self {
        let interval = std::env::var(SWEEP_INTERVAL_ENV)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL);

        Self {
            interval,
            event_buffer: 256,
        }
    }

    /// Set the sweep period (default: 5 s). Zero is clamped to 1 ms.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the eviction event channel capacity (default: 256).
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("sweeper task ended abnormally: {e}");
        }
    }
}

/// Periodic sweep over every group in a registry.
pub struct Sweeper;

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// Evictions are reported on the returned channel; when the channel is
    /// full or dropped, events are discarded and sweeping continues.
    /// Dropping the handle stops the sweeper as well.
    pub fn spawn(
        registry: Arc<GroupRegistry>,
        config: SweeperConfig,
    ) -> (SweeperHandle, mpsc::Receiver<Eviction>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(sweep_loop(registry, config.interval, event_tx, shutdown_rx));
        (
            SweeperHandle {
                shutdown_tx: Some(shutdown_tx),
                task,
            },
            event_rx,
        )
    }
}

async fn sweep_loop(
    registry: Arc<GroupRegistry>,
    period: Duration,
    event_tx: mpsc::Sender<Eviction>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    ticker.tick().await;

    tracing::debug!(?period, "sweeper started");
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                let evictions = registry.sweep_at(Instant::now());
                tracing::debug!(evicted = evictions.len(), "sweep done");
                for eviction in evictions {
                    if event_tx.try_send(eviction).is_err() {
                        tracing::debug!("eviction event dropped");
                    }
                }
            }
        }
    }
    tracing::debug!("sweeper stopped");
}
