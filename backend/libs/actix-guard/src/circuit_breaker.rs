//! Circuit breaker for external collaborators
//!
//! Wraps a fallible async call and trips after consecutive failures so a
//! struggling dependency is given room to recover instead of being hammered.
//! Closed passes calls through, Open rejects them outright until the cooldown
//! elapses, HalfOpen lets probes through and closes again after enough
//! successes.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing.
    pub cooldown: Duration,
    /// Consecutive half-open successes before the breaker closes.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    #[error("{0}")]
    Inner(E),
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Arc<RwLock<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            })),
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    /// Run `op` under the breaker. Returns `BreakerError::Open` without
    /// invoking `op` when the breaker is open and the cooldown has not
    /// elapsed.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.write().await;
            if inner.state == BreakerState::Open {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.cooldown {
                    return Err(BreakerError::Open(self.name.clone()));
                }
                tracing::info!(breaker = %self.name, "circuit breaker probing (half-open)");
                inner.state = BreakerState::HalfOpen;
                inner.consecutive_successes = 0;
            }
        }

        match op().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(BreakerError::Inner(e))
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "circuit breaker closed");
                    inner.state = BreakerState::Closed;
                    inner.opened_at = None;
                }
            }
            _ => inner.consecutive_successes = 0,
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_successes = 0;
        match inner.state {
            // A half-open probe failure reopens immediately.
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "circuit breaker reopened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold,
                cooldown,
                success_threshold: 1,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        b.call(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test]
    async fn passes_through_while_closed() {
        let b = breaker(3, Duration::from_secs(30));
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_and_short_circuits() {
        let b = breaker(3, Duration::from_secs(30));

        for _ in 0..3 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(b.state().await, BreakerState::Open);

        // Rejected without running the operation.
        assert!(matches!(succeed(&b).await, Err(BreakerError::Open(_))));
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let b = breaker(3, Duration::from_secs(30));

        fail(&b).await.ok();
        fail(&b).await.ok();
        succeed(&b).await.unwrap();
        fail(&b).await.ok();
        fail(&b).await.ok();
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let b = breaker(1, Duration::from_millis(20));

        fail(&b).await.ok();
        assert_eq!(b.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let b = breaker(1, Duration::from_millis(20));

        fail(&b).await.ok();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(fail(&b).await, Err(BreakerError::Inner(_))));
        assert_eq!(b.state().await, BreakerState::Open);
        assert!(matches!(succeed(&b).await, Err(BreakerError::Open(_))));
    }
}
