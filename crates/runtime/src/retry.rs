//! Exponential-backoff retry for idempotent remote calls.
//!
//! The wrapper is only ever applied to safe operations (context fetch,
//! random-POI fetch, model generation). Journey-log mutations are issued
//! exactly once; the orchestrator records their failures in the subsystem
//! summary instead of retrying.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff parameters: `delay_k = min(base · 2^(k−1) ± 10% jitter, max)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retrying after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as f64 * (1u64 << exponent) as f64;
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        let capped = (base_ms * jitter).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Whether an error is worth another attempt.
pub trait RetryClass {
    fn is_retryable(&self) -> bool;
}

impl RetryClass for crate::types::JourneyLogError {
    fn is_retryable(&self) -> bool {
        crate::types::JourneyLogError::is_retryable(self)
    }
}

impl RetryClass for crate::types::LlmError {
    fn is_retryable(&self) -> bool {
        crate::types::LlmError::is_retryable(self)
    }
}

/// Run `operation` up to `policy.max_attempts` times, sleeping between
/// attempts. The closure receives the 1-based attempt number. The final
/// classified error is returned unchanged.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: RetryClass + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.retryable)
        }
    }

    impl RetryClass for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_async(&fast_policy(), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, TestError> = retry_async(&fast_policy(), "op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(TestError { retryable: true })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_async(&fast_policy(), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: false }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_async(&fast_policy(), "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: true }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        // Attempt 1: ~100ms ± 10%.
        let d1 = policy.delay_for(1).as_millis();
        assert!((90..=110).contains(&d1), "d1={d1}");
        // Attempt 2: ~200ms ± 10%.
        let d2 = policy.delay_for(2).as_millis();
        assert!((180..=220).contains(&d2), "d2={d2}");
        // Attempt 3 would be ~400ms but is capped.
        let d3 = policy.delay_for(3).as_millis();
        assert!(d3 <= 350, "d3={d3}");
    }
}
