use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::dead_letter::DeadLetterQueue;
use crate::error::IngestError;
use crate::models::ErrorContext;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Mirrors `error_recovery.py::RecoveryStrategy`. `Checkpoint` and
/// `Rollback` are modeled by the dedicated `checkpoint`/`transaction`
/// modules rather than as branches here, since they need caller-supplied
/// state the generic dispatcher can't carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStrategy {
    RetryImmediate,
    RetryBackoff,
    CircuitBreaker,
    Fallback,
    Skip,
}

/// What terminally failed, recorded to the dead-letter queue by
/// `with_recovery` itself rather than by callers. Carries only identifying
/// metadata, not the operation's payload, so the queue never needs the
/// payload type to be serializable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedOperation {
    pub service_name: String,
    pub operation_name: String,
}

/// Combines the circuit breaker registry, retry engine, and dead-letter
/// queue behind one dispatch call, matching
/// `error_recovery.py::ErrorRecoveryManager.with_recovery`.
#[derive(Clone)]
pub struct ErrorRecoveryManager {
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    retry_config: RetryConfig,
    dead_letter: Arc<DeadLetterQueue<FailedOperation>>,
}

impl ErrorRecoveryManager {
    #[must_use]
    pub fn new(circuit_breaker_config: CircuitBreakerConfig, retry_config: RetryConfig) -> Self {
        Self::with_dead_letter_file(circuit_breaker_config, retry_config, None)
    }

    #[must_use]
    pub fn with_dead_letter_file(
        circuit_breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
        dead_letter_file: Option<PathBuf>,
    ) -> Self {
        Self {
            circuit_breakers: Arc::new(CircuitBreakerRegistry::new(circuit_breaker_config)),
            retry_config,
            dead_letter: Arc::new(DeadLetterQueue::new(1000, dead_letter_file)),
        }
    }

    #[must_use]
    pub fn circuit_breakers(&self) -> Arc<CircuitBreakerRegistry> {
        self.circuit_breakers.clone()
    }

    #[must_use]
    pub fn dead_letter(&self) -> Arc<DeadLetterQueue<FailedOperation>> {
        self.dead_letter.clone()
    }

    async fn enqueue_failure(&self, service_name: &str, operation_name: &str, err: &IngestError) {
        self.dead_letter
            .add(
                FailedOperation {
                    service_name: service_name.to_string(),
                    operation_name: operation_name.to_string(),
                },
                ErrorContext::new(err, operation_name),
            )
            .await;
    }

    /// Runs `operation` under the named recovery strategy. `service_name`
    /// identifies the circuit breaker to use for `CircuitBreaker` and to
    /// label retries for the rest. `fallback`, when given, is returned for
    /// `Fallback` and for `CircuitBreaker` while the circuit is open,
    /// matching spec §4.G's "fallback → f; on failure return fallback()".
    /// Any strategy that still fails after its retries/fallback are
    /// exhausted is recorded to the dead-letter queue before the error is
    /// returned.
    pub async fn with_recovery<F, Fut, T>(
        &self,
        service_name: &str,
        operation_name: &str,
        strategy: RecoveryStrategy,
        fallback: Option<T>,
        mut operation: F,
    ) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, IngestError>>,
    {
        let result = match strategy {
            RecoveryStrategy::Skip => match operation().await {
                Ok(value) => Ok(value),
                Err(err) => {
                    warn!(operation = operation_name, error = %err, "skipping failed operation");
                    Err(err)
                }
            },
            RecoveryStrategy::RetryImmediate => {
                let config = RetryConfig {
                    max_retries: 2,
                    base_delay: std::time::Duration::ZERO,
                    max_delay: std::time::Duration::ZERO,
                    jitter: false,
                    ..self.retry_config
                };
                retry_with_backoff(
                    operation_name,
                    config,
                    IngestError::is_retryable,
                    |_attempt| operation(),
                )
                .await
            }
            RecoveryStrategy::RetryBackoff => {
                retry_with_backoff(
                    operation_name,
                    self.retry_config,
                    IngestError::is_retryable,
                    |_attempt| operation(),
                )
                .await
            }
            RecoveryStrategy::CircuitBreaker => {
                let breaker = self.circuit_breakers.get_or_create(service_name).await;
                breaker.call(operation, fallback).await
            }
            RecoveryStrategy::Fallback => match operation().await {
                Ok(value) => Ok(value),
                Err(err) => {
                    if let Some(value) = fallback {
                        warn!(operation = operation_name, error = %err, "falling back after failure");
                        Ok(value)
                    } else {
                        Err(err)
                    }
                }
            },
        };
        if let Err(err) = &result {
            self.enqueue_failure(service_name, operation_name, err).await;
        }
        result
    }

    pub async fn get_recovery_status(&self, service_name: &str) -> crate::circuit_breaker::CircuitState {
        self.circuit_breakers.get_or_create(service_name).await.state().await
    }
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_backoff_eventually_succeeds() {
        let manager = ErrorRecoveryManager::new(
            CircuitBreakerConfig::default(),
            RetryConfig {
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
                ..RetryConfig::default()
            },
        );
        let attempts = AtomicU32::new(0);
        let result = manager
            .with_recovery(
                "youtube",
                "enumerate",
                RecoveryStrategy::RetryBackoff,
                None,
                || async {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                        Err(IngestError::Transport("flaky".into()))
                    } else {
                        Ok(())
                    }
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn circuit_breaker_strategy_trips_after_failures() {
        let manager = ErrorRecoveryManager::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: std::time::Duration::from_secs(60),
                success_threshold: 1,
            },
            RetryConfig::default(),
        );
        let first: Result<(), IngestError> = manager
            .with_recovery(
                "youtube",
                "probe",
                RecoveryStrategy::CircuitBreaker,
                None,
                || async { Err(IngestError::Transport("down".into())) },
            )
            .await;
        assert!(first.is_err());
        let status = manager.get_recovery_status("youtube").await;
        assert_eq!(status, crate::circuit_breaker::CircuitState::Open);
    }

    #[tokio::test]
    async fn circuit_breaker_strategy_returns_fallback_once_open() {
        let manager = ErrorRecoveryManager::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: std::time::Duration::from_secs(60),
                success_threshold: 1,
            },
            RetryConfig::default(),
        );
        let _: Result<u32, IngestError> = manager
            .with_recovery(
                "youtube",
                "probe",
                RecoveryStrategy::CircuitBreaker,
                None,
                || async { Err(IngestError::Transport("down".into())) },
            )
            .await;
        let second = manager
            .with_recovery(
                "youtube",
                "probe",
                RecoveryStrategy::CircuitBreaker,
                Some(7u32),
                || async { Err(IngestError::Transport("still down".into())) },
            )
            .await;
        assert_eq!(second.expect("fallback returned"), 7);
    }

    #[tokio::test]
    async fn fallback_strategy_returns_fallback_after_failure() {
        let manager = ErrorRecoveryManager::default();
        let result = manager
            .with_recovery(
                "youtube",
                "optional-enrichment",
                RecoveryStrategy::Fallback,
                Some("default".to_string()),
                || async { Err(IngestError::Transport("down".into())) },
            )
            .await;
        assert_eq!(result.expect("fallback used"), "default");
    }

    #[tokio::test]
    async fn skip_strategy_does_not_retry() {
        let manager = ErrorRecoveryManager::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), IngestError> = manager
            .with_recovery(
                "youtube",
                "optional-step",
                RecoveryStrategy::Skip,
                None,
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(IngestError::Validation("bad".into()))
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unhandled_failure_is_recorded_to_dead_letter_queue() {
        let manager = ErrorRecoveryManager::default();
        let result: Result<(), IngestError> = manager
            .with_recovery(
                "youtube",
                "enumerate",
                RecoveryStrategy::Skip,
                None,
                || async { Err(IngestError::Validation("bad".into())) },
            )
            .await;
        assert!(result.is_err());
        let entries = manager.dead_letter().get_all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item.operation_name, "enumerate");
    }
}
