use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wsgroup::{
    with_group_id, with_heart_check, with_max_conn_cnt, Group, GroupError, GroupRegistry,
    LoopbackConnection, Member, MemberId, Sweeper, SweeperConfig,
};

use crate::events::{emit, EventEviction, EventStarted, EventSummary};

pub struct ChurnConfig {
    pub groups: usize,
    pub workers: usize,
    pub capacity: usize,
    pub duration: Duration,
    pub heart_check: Duration,
    /// Probability that a worker skips a heartbeat for a member it holds.
    pub silence: f64,
}

/// Workers add, heartbeat, and remove members across several registered
/// groups while the sweeper evicts the silent ones. Any group observed
/// above its capacity counts as a failure.
pub async fn run(config: ChurnConfig, start: Instant) -> anyhow::Result<u64> {
    emit(&EventStarted::new("churn"));

    let registry = Arc::new(GroupRegistry::new());
    for g in 0..config.groups {
        let group = Group::new([
            with_group_id(format!("churn-{g}")),
            with_max_conn_cnt(config.capacity),
            with_heart_check(config.heart_check),
        ])?;
        registry.register(Arc::new(group))?;
    }

    let (sweeper, mut evictions) = Sweeper::spawn(
        registry.clone(),
        SweeperConfig::new().interval(config.heart_check / 2),
    );
    let reporter = tokio::spawn(async move {
        while let Some(eviction) = evictions.recv().await {
            emit(&EventEviction {
                event: "eviction",
                eviction: &eviction,
            });
        }
    });

    let deadline = tokio::time::Instant::now() + config.duration;
    let mut workers = Vec::with_capacity(config.workers);
    for w in 0..config.workers {
        let registry = registry.clone();
        let silence = config.silence.clamp(0.0, 1.0);
        workers.push(tokio::spawn(worker(w, registry, deadline, silence)));
    }

    let mut failures = 0u64;
    for worker in workers {
        failures += worker.await?;
    }

    sweeper.shutdown().await;
    reporter.await?;

    emit(&EventSummary {
        event: "summary",
        mode: "churn".into(),
        elapsed_s: start.elapsed().as_secs_f64(),
        failures,
        groups: registry.stats(),
    });
    Ok(failures)
}

async fn worker(
    index: usize,
    registry: Arc<GroupRegistry>,
    deadline: tokio::time::Instant,
    silence: f64,
) -> u64 {
    let mut rng = StdRng::seed_from_u64(index as u64);
    let groups = registry.groups();
    let mut held: Vec<(Arc<Group>, MemberId)> = Vec::new();
    let mut failures = 0u64;
    let mut seq = 0u64;

    while tokio::time::Instant::now() < deadline {
        let group = &groups[rng.random_range(0..groups.len())];
        match rng.random_range(0..3) {
            0 => {
                seq += 1;
                let id = MemberId::from(format!("w{index}-{seq}"));
                let conn = LoopbackConnection::new(format!("conn-{index}-{seq}"));
                match group.add_member(id.clone(), Member::connection(conn)) {
                    Ok(()) => held.push((group.clone(), id)),
                    Err(GroupError::CapacityExceeded { .. }) => {}
                    Err(e) => tracing::warn!("unexpected add failure: {e}"),
                }
            }
            1 if !held.is_empty() => {
                let (group, id) = held.swap_remove(rng.random_range(0..held.len()));
                // Already evicted by the sweeper is fine.
                let _ = group.remove_member(&id);
            }
            _ => {
                held.retain(|(group, id)| {
                    if rng.random_bool(silence) {
                        return true;
                    }
                    group.record_heartbeat(id).is_ok()
                });
            }
        }

        if groups.iter().any(|g| g.len() > g.capacity()) {
            failures += 1;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    failures
}
