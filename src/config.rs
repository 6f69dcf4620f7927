use serde::Deserialize;

use crate::task::QueueLane;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: Option<String>,

    /// Worker pool sizes, one pool per priority lane.
    pub critical_workers: usize,
    pub default_workers: usize,
    pub low_workers: usize,

    /// Retry ceiling applied when an enqueue request doesn't override it.
    pub default_max_retries: u32,

    /// Exponential backoff: `base * 2^(retry - 1)`, capped at `cap`, with a
    /// uniform jitter of up to `jitter` (fraction of the delay) either way.
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter: f64,

    /// Window after a dequeue during which the delivery is hidden from other
    /// workers. Expiry without an ack or fail makes it redeliverable.
    pub visibility_timeout_ms: u64,

    /// How long an idle worker sleeps before re-polling its lanes.
    pub poll_interval_ms: u64,

    /// Bound on a single handler invocation.
    pub handler_timeout_ms: u64,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("LEDGERBANK_").from_env::<Self>()?)
    }

    pub fn db_path(&self) -> Option<&str> {
        self.db_path.as_deref()
    }

    pub fn worker_count(&self, lane: QueueLane) -> usize {
        match lane {
            QueueLane::Critical => self.critical_workers,
            QueueLane::Default => self.default_workers,
            QueueLane::Low => self.low_workers,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            critical_workers: 4,
            default_workers: 2,
            low_workers: 1,
            default_max_retries: 10,
            backoff_base_ms: 500,
            backoff_cap_ms: 10 * 60 * 1000,
            backoff_jitter: 0.1,
            visibility_timeout_ms: 30_000,
            poll_interval_ms: 100,
            handler_timeout_ms: 30_000,
        }
    }
}
