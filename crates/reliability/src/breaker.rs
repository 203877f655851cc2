use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ragd_protocol::ApiError;
use tokio::time::Instant;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning for one dependency's breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing.
    pub open_duration: Duration,
    /// Consecutive half-open successes that restore CLOSED.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Per-dependency circuit breaker.
///
/// CLOSED counts consecutive failures; at the threshold it opens and fails
/// fast without invoking the operation. After `open_duration` the next call
/// probes in HALF_OPEN; `success_threshold` successes close it again, any
/// failure re-opens it.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Check whether a call may proceed, transitioning OPEN → HALF_OPEN when
    /// the open window has elapsed.
    fn acquire(&self) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    log::info!("breaker {}: OPEN -> HALF_OPEN", self.name);
                    Ok(())
                } else {
                    Err(ApiError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    log::info!("breaker {}: HALF_OPEN -> CLOSED", self.name);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    log::warn!(
                        "breaker {}: CLOSED -> OPEN after {} consecutive failures",
                        self.name,
                        inner.consecutive_failures
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                log::warn!("breaker {}: HALF_OPEN -> OPEN", self.name);
            }
            BreakerState::Open => {}
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Validation-class failures are the caller's fault, not the dependency's,
    /// so they do not count against the breaker.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.acquire()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_retryable() {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(err)
            }
        }
    }
}

/// Registry of breakers, pre-configured per dependency.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Defaults per known dependency; anything else falls back to 5 / 30s / 2.
    fn default_config(name: &str) -> BreakerConfig {
        match name {
            "embedding" => BreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
            "llm" => BreakerConfig {
                failure_threshold: 3,
                open_duration: Duration::from_secs(60),
                ..Default::default()
            },
            "vector_store" => BreakerConfig {
                failure_threshold: 5,
                open_duration: Duration::from_secs(15),
                ..Default::default()
            },
            "confluence" => BreakerConfig {
                failure_threshold: 3,
                open_duration: Duration::from_secs(60),
                ..Default::default()
            },
            _ => BreakerConfig::default(),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, Self::default_config(name))
    }

    pub fn get_with(&self, name: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock");
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    /// Current state per registered breaker, for /health.
    pub fn snapshot(&self) -> HashMap<String, &'static str> {
        let breakers = self.breakers.lock().expect("registry lock");
        breakers
            .iter()
            .map(|(name, breaker)| {
                let state = match breaker.state() {
                    BreakerState::Closed => "closed",
                    BreakerState::Open => "open",
                    BreakerState::HalfOpen => "half_open",
                };
                (name.clone(), state)
            })
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing() -> Result<(), ApiError> {
        Err(ApiError::external("embedding", "connection refused"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold_without_invoking_op() {
        let breaker = CircuitBreaker::new(
            "embedding",
            BreakerConfig {
                failure_threshold: 3,
                ..Default::default()
            },
        );

        for _ in 0..3 {
            let _ = breaker.call(|| async { failing() }).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ApiError::CircuitOpen(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let breaker = CircuitBreaker::new(
            "vector_store",
            BreakerConfig {
                failure_threshold: 2,
                open_duration: Duration::from_secs(30),
                success_threshold: 2,
            },
        );

        for _ in 0..2 {
            let _ = breaker.call(|| async { failing() }).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "llm",
            BreakerConfig {
                failure_threshold: 1,
                open_duration: Duration::from_secs(10),
                success_threshold: 2,
            },
        );
        let _ = breaker.call(|| async { failing() }).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        let _ = breaker.call(|| async { failing() }).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors_do_not_trip() {
        let breaker = CircuitBreaker::new(
            "embedding",
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        for _ in 0..5 {
            let _: Result<(), _> = breaker
                .call(|| async { Err(ApiError::validation("bad")) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_registry_preconfigured_defaults() {
        let registry = BreakerRegistry::new();
        let embedding = registry.get("embedding");
        assert_eq!(embedding.config.failure_threshold, 3);
        let vector = registry.get("vector_store");
        assert_eq!(vector.config.open_duration, Duration::from_secs(15));
        // Same instance on repeat lookups.
        assert!(Arc::ptr_eq(&embedding, &registry.get("embedding")));
    }
}
