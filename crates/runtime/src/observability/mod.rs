//! Observability: structured logging setup, counters and redaction.
//!
//! Every phase of a turn emits a structured `tracing` event with the
//! runtime-owned fields (`trace_id`, `character_id`, `turn_id`, `phase`,
//! `latency_ms`). Turn-completion summaries may be sampled down via
//! `turn_log_sampling_rate`; phase-level warnings and errors are never
//! sampled.

use rand::Rng;
use tracing_subscriber::EnvFilter;

pub mod metrics;
pub mod redact;

pub use metrics::{MetricsSnapshot, RuntimeMetrics};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber from config.
///
/// Safe to call once per process; subsequent calls are ignored (tests install
/// their own subscribers).
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json_format {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    }
}

/// Probabilistic sampler for turn-completion log lines.
#[derive(Debug, Clone)]
pub struct TurnLogSampler {
    rate: f64,
}

impl TurnLogSampler {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    /// Whether this turn's completion summary should be logged.
    pub fn should_log(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.rate
    }
}
