use std::future::Future;
use std::time::Duration;

use rand::Rng;
use ragd_protocol::ApiError;

/// Retry policy with exponential backoff and per-attempt timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single attempt; elapsing it yields a retryable
    /// `Timeout` error.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Exponential delay before attempt `attempt + 1` (0-based), without jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    exp.min(policy.max_delay)
}

/// Apply ±10% jitter to a backoff delay.
fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    delay.mul_f64(factor)
}

/// Run `op` up to `policy.max_attempts` times.
///
/// Only errors classified retryable are replayed; validation, auth and
/// circuit-open failures surface immediately. Each attempt runs under the
/// policy timeout, and a timed-out attempt is itself retryable.
pub async fn with_retry<T, F, Fut>(name: &str, policy: RetryPolicy, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut last_err = ApiError::Unknown(format!("{name}: no attempts made"));

    for attempt in 0..policy.max_attempts {
        let started = tokio::time::Instant::now();
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = with_jitter(backoff_delay(&policy, attempt));
                log::debug!(
                    "{name}: attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    err.code(),
                    delay
                );
                last_err = err;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(400));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 10), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let base = Duration::from_millis(400);
        for _ in 0..200 {
            let jittered = with_jitter(base);
            assert!(jittered >= Duration::from_millis(360), "{jittered:?}");
            assert!(jittered <= Duration::from_millis(440), "{jittered:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_only_retryable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), ApiError> = with_retry("test", RetryPolicy::default(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::validation("bad input"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_external_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = with_retry("test", RetryPolicy::default(), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::external("embedding", "connection reset"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_error() {
        let result: Result<(), ApiError> =
            with_retry("test", RetryPolicy::default(), || async {
                Err(ApiError::external("llm", "502"))
            })
            .await;
        match result {
            Err(ApiError::ExternalService { service, .. }) => assert_eq!(service, "llm"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
