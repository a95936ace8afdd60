use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::IngestError;
use crate::rate_limiter::jittered;

/// Mirrors `error_recovery.py::RetryManager`'s exponential backoff schedule.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// `base_delay * exponential_base^retry_count`, capped at `max_delay`,
    /// then jittered, matching `RetryManager.get_delay`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped.max(0.0));
        if self.jitter {
            jittered(delay)
        } else {
            delay
        }
    }
}

/// Retries `operation` up to `config.max_retries` additional times (so
/// `max_retries + 1` attempts total), matching `RetryManager.retry`.
/// `should_retry` lets the caller narrow which errors are worth retrying
/// beyond `IngestError::is_retryable`; pass `|_| true` to retry anything
/// the operation returns.
pub async fn retry_with_backoff<F, Fut, T, S>(
    operation_name: &str,
    config: RetryConfig,
    should_retry: S,
    mut operation: F,
) -> Result<T, IngestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
    S: Fn(&IngestError) -> bool,
{
    let mut last_error = None;
    for attempt in 0..=config.max_retries {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt == config.max_retries || !should_retry(&err) {
                    last_error = Some(err);
                    break;
                }
                let delay = config.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    ?delay,
                    error = %err,
                    "retrying after failure"
                );
                last_error = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    debug!(operation = operation_name, "retry attempts exhausted");
    Err(last_error.unwrap_or(IngestError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_before_jitter() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        };
        let result: Result<u32, IngestError> = retry_with_backoff(
            "flaky",
            config,
            IngestError::is_retryable,
            |_attempt| {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(IngestError::Transport("not yet".into()))
                    } else {
                        Ok(count)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.expect("eventual success"), 2);
    }

    #[tokio::test]
    async fn stops_immediately_when_should_retry_rejects() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };
        let result: Result<(), IngestError> = retry_with_backoff(
            "not-retryable",
            config,
            |_err| false,
            |_attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(IngestError::Validation("bad input".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        };
        let result: Result<(), IngestError> = retry_with_backoff(
            "always-fails",
            config,
            IngestError::is_retryable,
            |_attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(IngestError::Transport("down".into())) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
