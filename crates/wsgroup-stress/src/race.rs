use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Barrier;
use wsgroup::{with_group_id, with_max_conn_cnt, Group, GroupError, LoopbackConnection, Member};

use crate::events::{emit, EventRaceRound, EventStarted, EventSummary};

pub struct RaceConfig {
    pub tasks: usize,
    pub rounds: u32,
}

/// Start `tasks` adders on a barrier against a group of capacity
/// `tasks - 1`, for `rounds` rounds. Any round where more than
/// `capacity` adds succeed counts as a failure.
pub async fn run(config: RaceConfig, start: Instant) -> anyhow::Result<u64> {
    anyhow::ensure!(config.tasks >= 2, "race needs at least 2 tasks");
    emit(&EventStarted::new("race"));

    let capacity = config.tasks - 1;
    let mut failures = 0u64;
    let mut last_stats = Vec::new();

    for round in 1..=config.rounds {
        let group = Arc::new(Group::new([
            with_group_id(format!("race-{round}")),
            with_max_conn_cnt(capacity),
        ])?);
        let barrier = Arc::new(Barrier::new(config.tasks));

        let mut handles = Vec::with_capacity(config.tasks);
        for i in 0..config.tasks {
            let group = group.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                group.add_member(
                    format!("m{i}"),
                    Member::connection(LoopbackConnection::new(format!("c{i}"))),
                )
            }));
        }

        let mut accepted = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await? {
                Ok(()) => accepted += 1,
                Err(GroupError::CapacityExceeded { .. }) => refused += 1,
                Err(e) => return Err(e.into()),
            }
        }

        let overshoot = accepted > capacity || group.len() > capacity;
        if overshoot || accepted != capacity {
            failures += 1;
        }
        emit(&EventRaceRound {
            event: "race_round",
            round,
            tasks: config.tasks,
            capacity,
            accepted,
            refused,
            overshoot,
        });
        last_stats = vec![group.stats()];
    }

    emit(&EventSummary {
        event: "summary",
        mode: "race".into(),
        elapsed_s: start.elapsed().as_secs_f64(),
        failures,
        groups: last_stats,
    });
    Ok(failures)
}
