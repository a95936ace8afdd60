use std::time::Duration;

/// Closed taxonomy of failure kinds that cross a component boundary.
///
/// Validation and configuration errors are meant to fail fast at
/// construction time; the rest describe conditions a caller up the stack
/// (retry engine, recovery manager, coordinator) needs to reason about.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limit timeout after {0:?}")]
    RateLimitTimeout(Duration),

    #[error("circuit breaker open for service '{0}'")]
    CircuitOpen(String),

    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether the retry engine's default predicate should retry this kind.
    ///
    /// Mirrors `error_recovery.py`'s propagation policy (spec §7): transport
    /// and persistence failures are retryable, circuit-open and rate-limit
    /// timeouts are retryable by the caller's own strategy (fallback or
    /// after the recovery window), validation/configuration/dependency
    /// failures are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Transport(_)
                | IngestError::Persistence(_)
                | IngestError::RateLimitTimeout(_)
                | IngestError::CircuitOpen(_)
        )
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "ValidationError",
            IngestError::Configuration(_) => "ConfigurationError",
            IngestError::Transport(_) => "TransportError",
            IngestError::RateLimitTimeout(_) => "RateLimitTimeout",
            IngestError::CircuitOpen(_) => "CircuitOpen",
            IngestError::DependencyMissing(_) => "DependencyMissing",
            IngestError::Persistence(_) => "PersistenceError",
            IngestError::NotFound(_) => "NotFound",
            IngestError::Cancelled => "Cancelled",
        }
    }
}
