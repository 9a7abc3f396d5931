//! Retry with exponential backoff.
//!
//! Pure higher-order function: callers pass the operation, the policy is
//! plain data. Only errors flagged retryable are replayed; a
//! [`corelib::error::ErrorKind::Validation`] error therefore never retries.

use std::future::Future;
use std::time::Duration;

use corelib::error::EngineError;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Backoff before re-running after failed attempt `n` (1-based):
    /// `min(base * multiplier^(n-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        self.base_delay.mul_f64(exp).min(self.max_delay)
    }
}

/// Run `op` up to `policy.max_attempts` times.
///
/// `op` receives the 1-based attempt number. The last error is returned
/// when attempts exhaust; non-retryable errors return immediately.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &'static str,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(out) => return Ok(out),
            Err(err) if !err.is_retryable() => {
                warn!(label, attempt, error = %err, "non-retryable failure");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_attempts => {
                warn!(label, attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(40),
        }
    }

    #[test]
    fn delay_follows_capped_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // Capped at max from here on.
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let out = retry(&fast_policy(), "test", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, EngineError>(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replays_retryable_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let out = retry(&fast_policy(), "test", move |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(EngineError::routing("venue down"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = retry(&fast_policy(), "test", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EngineError::execution("swap reverted"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.message, "swap reverted");
    }

    #[tokio::test(start_paused = true)]
    async fn never_replays_validation() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let err = retry(&fast_policy(), "test", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EngineError::validation("amount must be greater than 0"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_system_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let _ = retry(&fast_policy(), "test", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EngineError::system("circuit breaker OPEN").non_retryable())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_cap(attempt in 1u32..64) {
            let policy = RetryPolicy::default();
            proptest::prop_assert!(policy.delay_for(attempt) <= policy.max_delay);
        }

        #[test]
        fn delay_is_monotonic_in_attempts(a in 1u32..32, b in 1u32..32) {
            let policy = RetryPolicy::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            proptest::prop_assert!(policy.delay_for(lo) <= policy.delay_for(hi));
        }
    }
}
