//! Jittered exponential backoff for rate-limited bulk operations.
//!
//! Only idempotent bulk calls go through here; anything else fails fast.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetrySettings;

use super::remote::RemoteError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Full jitter over the capped exponential: anything between zero and
    /// `min(max_delay, base * 2^attempt)`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let millis = u64::try_from(exponential.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=millis))
    }
}

/// Run `request` until it succeeds, fails non-retryably, or exhausts the
/// policy's attempts. A `retry_after` hint from the server overrides the
/// computed delay.
pub async fn retry_rate_limited<T, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut request: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = match &error {
                    RemoteError::RateLimited {
                        retry_after_ms: Some(after),
                    } => Duration::from_millis(*after),
                    _ => policy.delay_for(attempt),
                };
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::from(&RetrySettings {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
        })
    }

    #[tokio::test]
    async fn retries_rate_limiting_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_rate_limited(&policy(4), "test", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(RemoteError::RateLimited {
                        retry_after_ms: Some(1),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.expect("succeeds on third attempt"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_capped_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_rate_limited(&policy(3), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(RemoteError::RateLimited {
                    retry_after_ms: Some(1),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_rate_limited(&policy(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::server(500, "boom")) }
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Server { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_stay_under_the_cap() {
        let policy = policy(8);
        for attempt in 0..8 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(4));
        }
    }
}
