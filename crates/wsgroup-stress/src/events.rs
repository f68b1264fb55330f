use serde::Serialize;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use wsgroup::{Eviction, GroupStats};

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

/// Seconds since the Unix epoch, as a string.
pub fn now_iso() -> String {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s", d.as_secs())
}

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub mode: String,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(mode: &str) -> Self {
        Self {
            event: "started",
            mode: mode.to_string(),
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize)]
pub struct EventRaceRound {
    pub event: &'static str,
    pub round: u32,
    pub tasks: usize,
    pub capacity: usize,
    pub accepted: usize,
    pub refused: usize,
    pub overshoot: bool,
}

#[derive(Serialize)]
pub struct EventEviction<'a> {
    pub event: &'static str,
    #[serde(flatten)]
    pub eviction: &'a Eviction,
}

#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub mode: String,
    pub elapsed_s: f64,
    pub failures: u64,
    pub groups: Vec<GroupStats>,
}
