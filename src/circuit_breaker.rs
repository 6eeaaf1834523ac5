/*!
 * # Circuit Breaker
 *
 * Guards outbound calls to the payment provider. After `failure_threshold`
 * consecutive failures the circuit opens and calls fail fast until `timeout`
 * has elapsed; the next call is then let through as a probe.
 */

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through
    Closed,
    /// Calls are rejected without reaching the provider
    Open,
    /// Probing whether the provider recovered
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Time spent open before a probe is allowed
    pub timeout: Duration,
    /// Successful probes needed to close the circuit again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Runs `operation` unless the circuit is open.
    ///
    /// The lock is never held across the await, so a slow provider does not
    /// block unrelated callers.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if elapsed {
                    tracing::info!(breaker = self.name, "circuit half-open, probing");
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                }
                elapsed
            }
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(breaker = self.name, "circuit closed");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.opened_at = None;
                }
            }
            _ => state.failure_count = 0,
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;

        let should_open = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            tracing::warn!(
                breaker = self.name,
                failures = state.failure_count,
                "circuit opened"
            );
            state.state = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            state.success_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout,
                success_threshold: 1,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let cb = breaker(2, Duration::from_secs(60));

        assert_matches!(fail(&cb).await, Err(CircuitBreakerError::Inner("boom")));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_matches!(fail(&cb).await, Err(CircuitBreakerError::Inner("boom")));
        assert_eq!(cb.state(), CircuitState::Open);

        let mut called = false;
        let result = cb
            .call(|| {
                called = true;
                async { Ok::<_, &str>(()) }
            })
            .await;
        assert_matches!(result, Err(CircuitBreakerError::Open));
        assert!(!called);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = breaker(2, Duration::from_secs(60));

        let _ = fail(&cb).await;
        let ok = cb.call(|| async { Ok::<_, &str>(7) }).await;
        assert_matches!(ok, Ok(7));
        let _ = fail(&cb).await;

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_after_timeout_closes_on_success() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let ok = cb.call(|| async { Ok::<_, &str>(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = fail(&cb).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
