use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::IngestError;

/// Mirrors `error_recovery.py::CircuitState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl Inner {
    /// Re-evaluates OPEN -> HALF_OPEN transitions lazily, matching the
    /// Python `state` property.
    fn effective_state(&mut self) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if Instant::now().saturating_duration_since(opened_at) >= self.config.recovery_timeout
                {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                }
            }
        }
        self.state
    }

    fn on_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.success_count = self.success_count.saturating_add(1);
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.opened_at = None;
                }
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
                self.success_count = 0;
            }
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// A single named circuit breaker, matching `error_recovery.py::CircuitBreaker`.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                config,
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.effective_state()
    }

    /// Runs `operation`, recording success/failure against the circuit.
    /// If the circuit is open, returns `IngestError::CircuitOpen` and runs
    /// `fallback` if one was given (matching `CircuitBreaker.call`).
    pub async fn call<F, Fut, T>(
        &self,
        operation: F,
        fallback: Option<T>,
    ) -> Result<T, IngestError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, IngestError>>,
    {
        let state = { self.inner.lock().await.effective_state() };
        if state == CircuitState::Open {
            warn!(circuit = %self.name, "circuit open, short-circuiting call");
            if let Some(value) = fallback {
                return Ok(value);
            }
            return Err(IngestError::CircuitOpen(self.name.clone()));
        }
        match operation().await {
            Ok(value) => {
                self.inner.lock().await.on_success();
                Ok(value)
            }
            Err(err) => {
                self.inner.lock().await.on_failure();
                let new_state = self.inner.lock().await.effective_state();
                if new_state == CircuitState::Open {
                    info!(circuit = %self.name, "circuit tripped open");
                }
                Err(err)
            }
        }
    }
}

/// A named registry of circuit breakers, matching
/// `ErrorRecoveryManager.get_circuit_breaker`'s lazy-create-per-name pattern.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, name: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(name, self.config)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(20),
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("svc", fast_config());
        for _ in 0..2 {
            let result: Result<(), IngestError> = breaker
                .call(
                    || async { Err(IngestError::Transport("boom".into())) },
                    None,
                )
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn half_opens_after_recovery_timeout_and_closes_on_success() {
        let breaker = CircuitBreaker::new("svc", fast_config());
        for _ in 0..2 {
            let _: Result<(), IngestError> = breaker
                .call(
                    || async { Err(IngestError::Transport("boom".into())) },
                    None,
                )
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        let result = breaker.call(|| async { Ok::<_, IngestError>(()) }, None).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_uses_fallback_when_given() {
        let breaker = CircuitBreaker::new("svc", fast_config());
        for _ in 0..2 {
            let _: Result<(), IngestError> = breaker
                .call(
                    || async { Err(IngestError::Transport("boom".into())) },
                    None,
                )
                .await;
        }
        let result = breaker
            .call(|| async { Ok::<_, IngestError>(1) }, Some(99))
            .await;
        assert_eq!(result.expect("fallback used"), 99);
    }
}
