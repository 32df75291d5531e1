//! Circuit breaker for outbound agent calls.
//!
//! One breaker per downstream target, created lazily by [`BreakerRegistry`].
//! State transitions happen lazily on each call attempt; there is no
//! background timer. Counters are updated under a single per-breaker lock, so
//! concurrent callers cannot corrupt them. The breaker guards only this
//! process; state is not coordinated across callers.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Requests fail fast without invoking the wrapped operation.
    Open,
    /// Testing whether the target has recovered.
    HalfOpen,
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before allowing a trial call.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Per-call timeout in seconds; a timeout counts as a failure.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 { 5 }
fn default_recovery_timeout() -> u64 { 60 }
fn default_success_threshold() -> u32 { 2 }
fn default_call_timeout() -> u64 { 30 }

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Errors produced by a breaker-wrapped call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the wrapped operation was not invoked.
    #[error("Circuit breaker '{name}' is open")]
    Open { name: String },
    /// The wrapped operation exceeded the configured timeout.
    #[error("Call through circuit breaker '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },
    /// The wrapped operation itself failed.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

/// Point-in-time snapshot of a breaker's state, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub config: CircuitBreakerConfig,
}

/// Per-target failure/recovery state machine wrapping any outbound call.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker for `name` with the given thresholds.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        log::info!("Circuit breaker '{}' initialized: {:?}", name, config);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_success: None,
            }),
        }
    }

    /// Execute `op` under breaker protection with the configured timeout.
    ///
    /// Fails fast with [`BreakerError::Open`] while the circuit is open and
    /// the recovery timeout has not elapsed; otherwise the call proceeds and
    /// its outcome (including timeout) drives the state machine.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            log::warn!("Circuit breaker '{}' is OPEN - failing fast", self.name);
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        }

        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                log::error!("Circuit breaker '{}' - execution failed", self.name);
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                log::error!(
                    "Circuit breaker '{}' - timeout after {}s",
                    self.name,
                    self.config.call_timeout_secs
                );
                self.record_failure();
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    timeout_secs: self.config.call_timeout_secs,
                })
            }
        }
    }

    /// Check whether a call may proceed, applying the lazy open -> half-open
    /// transition when the recovery timeout has elapsed.
    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .map(|t| t.elapsed() >= Duration::from_secs(self.config.recovery_timeout_secs))
                    .unwrap_or(true);
                if recovered {
                    log::info!("Circuit breaker '{}' transitioning to HALF_OPEN", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                log::debug!(
                    "Circuit breaker '{}' - success {}/{}",
                    self.name,
                    inner.success_count,
                    self.config.success_threshold
                );
                if inner.success_count >= self.config.success_threshold {
                    log::info!("Circuit breaker '{}' transitioning to CLOSED", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                log::error!("Circuit breaker '{}' transitioning to OPEN", self.name);
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.failure_count += 1;
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                log::warn!(
                    "Circuit breaker '{}' - failure {}/{}",
                    self.name,
                    inner.failure_count,
                    self.config.failure_threshold
                );
                if inner.failure_count >= self.config.failure_threshold {
                    log::error!("Circuit breaker '{}' transitioning to OPEN", self.name);
                    inner.state = CircuitState::Open;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state (after applying no transitions).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the breaker for status endpoints.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            config: self.config.clone(),
        }
    }

    /// Force the breaker back to closed, clearing both counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        log::info!("Reset circuit breaker: {}", self.name);
    }
}

/// Lazily-created breakers keyed by downstream target name.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Get or create the breaker for a target.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                log::info!("Created circuit breaker for target: {}", name);
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Snapshot all breakers.
    pub fn all_status(&self) -> Vec<BreakerStatus> {
        self.breakers.iter().map(|entry| entry.value().status()).collect()
    }

    /// Reset one breaker to closed, if it exists.
    pub fn reset(&self, name: &str) {
        if let Some(breaker) = self.breakers.get(name) {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(failures: u32, successes: u32, recovery_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            recovery_timeout_secs: recovery_secs,
            success_threshold: successes,
            call_timeout_secs: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(|| async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_nth_failure_opens_circuit() {
        let breaker = CircuitBreaker::new("t", config(3, 2, 60));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_closed_failure_count() {
        let breaker = CircuitBreaker::new("t", config(2, 1, 60));
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        // Consecutive count was reset, so still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let breaker = CircuitBreaker::new("t", config(1, 1, 60));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_after_recovery_and_mth_success_closes() {
        let breaker = CircuitBreaker::new("t", config(1, 2, 0));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        // recovery_timeout = 0: next attempt flows as half-open.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let status = breaker.status();
        assert_eq!(status.failure_count, 0);
        assert_eq!(status.success_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("t", config(1, 2, 0));
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("t", config(1, 1, 60));
        let result = breaker
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_registry_creates_lazily_and_resets() {
        let registry = BreakerRegistry::new(config(1, 1, 60));
        let breaker = registry.get("menu");
        fail(&breaker).await.unwrap_err();
        assert_eq!(registry.get("menu").state(), CircuitState::Open);
        registry.reset("menu");
        assert_eq!(registry.get("menu").state(), CircuitState::Closed);
        assert_eq!(registry.all_status().len(), 1);
    }
}
