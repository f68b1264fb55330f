mod churn;
mod events;
mod race;

use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "wsgroup-stress", about = "Stress test for the wsgroup registry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Racing adds against a group one slot short (capacity check race).
    Race {
        /// Concurrent adders per round (capacity is tasks - 1).
        #[arg(long, default_value = "256")]
        tasks: usize,
        /// Number of rounds.
        #[arg(long, default_value = "100")]
        rounds: u32,
    },

    /// Random add/heartbeat/remove across groups with the sweeper running.
    Churn {
        /// Number of registered groups.
        #[arg(long, default_value = "4")]
        groups: usize,
        /// Concurrent worker tasks.
        #[arg(long, default_value = "32")]
        workers: usize,
        /// Capacity of each group.
        #[arg(long, default_value = "50")]
        capacity: usize,
        /// Run time in seconds.
        #[arg(long, default_value = "10")]
        duration: u64,
        /// Heartbeat interval in ms.
        #[arg(long, default_value = "200")]
        heart_check: u64,
        /// Probability of skipping a heartbeat (0.0–1.0).
        #[arg(long, default_value = "0.2")]
        silence: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    eprintln!("wsgroup-stress v{}", env!("CARGO_PKG_VERSION"));

    let failures = match cli.command {
        Command::Race { tasks, rounds } => {
            race::run(race::RaceConfig { tasks, rounds }, start).await?
        }

        Command::Churn {
            groups,
            workers,
            capacity,
            duration,
            heart_check,
            silence,
        } => {
            anyhow::ensure!(groups > 0, "churn needs at least one group");
            churn::run(
                churn::ChurnConfig {
                    groups,
                    workers,
                    capacity,
                    duration: Duration::from_secs(duration),
                    heart_check: Duration::from_millis(heart_check.max(2)),
                    silence,
                },
                start,
            )
            .await?
        }
    };

    if failures > 0 {
        anyhow::bail!("{failures} capacity violations observed");
    }
    eprintln!("done in {:.2}s, no violations", start.elapsed().as_secs_f64());
    Ok(())
}
