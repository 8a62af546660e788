//! Lightweight counter registry for the turn pipeline.
//!
//! Counters are plain relaxed atomics; exporting them to an external sink is
//! a host concern. [`RuntimeMetrics::snapshot`] produces a serializable view
//! for debug surfaces.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters observed across all turns processed by one runtime instance.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub turns_started: AtomicU64,
    pub turns_completed: AtomicU64,
    pub turns_failed: AtomicU64,
    pub turns_rate_limited: AtomicU64,

    /// Schema-conformant vs. non-conformant model outputs.
    pub outcomes_schema_valid: AtomicU64,
    pub outcomes_schema_invalid: AtomicU64,

    pub spark_fetches: AtomicU64,
    pub spark_fetch_failures: AtomicU64,

    pub writes_attempted: AtomicU64,
    pub writes_succeeded: AtomicU64,
    pub writes_failed: AtomicU64,
}

/// Point-in-time view of [`RuntimeMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub turns_rate_limited: u64,
    pub outcomes_schema_valid: u64,
    pub outcomes_schema_invalid: u64,
    pub spark_fetches: u64,
    pub spark_fetch_failures: u64,
    pub writes_attempted: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            turns_started: self.turns_started.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            turns_rate_limited: self.turns_rate_limited.load(Ordering::Relaxed),
            outcomes_schema_valid: self.outcomes_schema_valid.load(Ordering::Relaxed),
            outcomes_schema_invalid: self.outcomes_schema_invalid.load(Ordering::Relaxed),
            spark_fetches: self.spark_fetches.load(Ordering::Relaxed),
            spark_fetch_failures: self.spark_fetch_failures.load(Ordering::Relaxed),
            writes_attempted: self.writes_attempted.load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
        }
    }
}
