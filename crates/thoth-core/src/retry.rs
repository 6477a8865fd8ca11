//! Unified retry policy with exponential backoff
//!
//! One policy serves every adapter and the browser engine; per-adapter
//! divergence is limited to the parameters, never the loop shape.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;

/// Exponential backoff parameters: `base_delay · 2^(attempt-1)`, jittered.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Relative jitter applied to each delay, e.g. `0.2` for ±20 %.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Browser steps retry fewer times than API pages.
    pub fn browser_step() -> Self {
        Self {
            max_attempts: 3,
            ..Self::default()
        }
    }

    /// Jittered delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.as_secs_f64() * f64::from(2u32.pow(exp));
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64(base * factor)
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// Only retryable errors ([`DiscoveryError::is_retryable`]) are attempted
/// again. An in-flight attempt is never interrupted; cancellation is
/// observed between attempts and while sleeping.
///
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion,
/// non-retryable error or cancellation.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, DiscoveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DiscoveryError>>,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < policy.max_attempts && e.is_retryable() => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:.1?}",
                    policy.max_attempts
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                }
            }
            Err(e) => {
                if !e.is_cancelled() {
                    log::warn!("{label}: failed permanently: {e}");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> DiscoveryError {
        DiscoveryError::TransientRemote {
            status: Some(500),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=4 {
            let unjittered = Duration::from_secs(1 << (attempt - 1)).as_secs_f64();
            let d = policy.delay_for(attempt).as_secs_f64();
            assert!(d >= unjittered * 0.8 - f64::EPSILON);
            assert!(d <= unjittered * 1.2 + f64::EPSILON);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&policy, "test", &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&policy, "test", &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&policy, "test", &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DiscoveryError::PermanentRemote {
                status: Some(404),
                message: "gone".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> =
            retry_with_backoff(&policy, "test", &cancel, || async { Err(transient()) }).await;

        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
    }
}
