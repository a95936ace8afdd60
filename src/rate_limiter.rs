use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitServiceConfig;
use crate::error::IngestError;

/// Token bucket parameters for one service, mirroring
/// `utils/rate_limiter.py::RateLimitConfig`.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub rate: f64,
    pub burst: u32,
}

impl RateLimitConfig {
    pub fn new(rate: f64, burst: u32) -> Result<Self, IngestError> {
        let config = Self { rate, burst };
        let service_config = RateLimitServiceConfig { rate, burst };
        service_config.validate()?;
        Ok(config)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: 2.0, burst: 5 }
    }
}

/// A token bucket: `burst` tokens of capacity refilled at `rate` tokens/sec.
struct TokenBucketState {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucketState {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: f64::from(config.burst),
            last_refill: Instant::now(),
            config,
        }
    }

    fn add_tokens(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refill = elapsed * self.config.rate;
        if refill > 0.0 {
            self.tokens = (self.tokens + refill).min(f64::from(self.config.burst));
            self.last_refill = now;
        }
    }

    fn try_acquire(&mut self, tokens: f64) -> bool {
        self.add_tokens();
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    fn status(&mut self) -> RateLimitStatus {
        self.add_tokens();
        let utilization = if self.config.burst == 0 {
            0.0
        } else {
            (1.0 - self.tokens / f64::from(self.config.burst)) * 100.0
        };
        RateLimitStatus {
            rate: self.config.rate,
            burst: self.config.burst,
            tokens: round_to(self.tokens, 2),
            utilization_percent: round_to(utilization, 1),
        }
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(decimals).unwrap_or(0));
    (value * factor).round() / factor
}

/// The `get_status()` DTO, matching §10.4's rounding rules.
#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct RateLimitStatus {
    pub rate: f64,
    pub burst: u32,
    pub tokens: f64,
    pub utilization_percent: f64,
}

/// Per-service token buckets, matching `utils/rate_limiter.py::ServiceRateLimiter`.
///
/// Services not explicitly configured fall back to `RateLimitConfig::default()`
/// (`rate=2.0, burst=5`), per §10.4.
pub struct ServiceRateLimiter {
    default_config: RateLimitConfig,
    buckets: Mutex<HashMap<String, TokenBucketState>>,
}

impl ServiceRateLimiter {
    #[must_use]
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn configure(&self, service: &str, config: RateLimitConfig) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(service.to_string(), TokenBucketState::new(config));
    }

    async fn bucket_config_or_default(&self, service: &str) -> RateLimitConfig {
        let buckets = self.buckets.lock().await;
        buckets
            .get(service)
            .map_or(self.default_config, |bucket| bucket.config)
    }

    /// Non-blocking acquire: returns `true` if `tokens` were available now.
    pub async fn acquire(&self, service: &str, tokens: f64) -> bool {
        let default_config = self.default_config;
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(service.to_string())
            .or_insert_with(|| TokenBucketState::new(default_config));
        bucket.try_acquire(tokens)
    }

    /// Blocking wait for `tokens` to become available, matching
    /// `TokenBucket.wait_for_tokens`: retries in a loop, sleeping the
    /// smaller of the estimated wait and one second, until `timeout` elapses.
    pub async fn wait_for_tokens(
        &self,
        service: &str,
        tokens: f64,
        timeout: Duration,
    ) -> Result<(), IngestError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.acquire(service, tokens).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(service, "rate limit wait timed out");
                return Err(IngestError::RateLimitTimeout(timeout));
            }
            let config = self.bucket_config_or_default(service).await;
            let needed = tokens.max(0.0);
            let estimated_wait = if config.rate > 0.0 {
                needed / config.rate
            } else {
                1.0
            };
            let sleep_for = Duration::from_secs_f64(estimated_wait.min(1.0).max(0.01));
            debug!(service, ?sleep_for, "waiting for rate limit tokens");
            tokio::time::sleep(sleep_for).await;
        }
    }

    pub async fn status(&self, service: &str) -> RateLimitStatus {
        let default_config = self.default_config;
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(service.to_string())
            .or_insert_with(|| TokenBucketState::new(default_config));
        bucket.status()
    }

    pub async fn status_all(&self) -> HashMap<String, RateLimitStatus> {
        let mut buckets = self.buckets.lock().await;
        buckets
            .iter_mut()
            .map(|(name, bucket)| (name.clone(), bucket.status()))
            .collect()
    }
}

/// Small helper mirroring the Python `rate_limit` decorator: try a
/// non-blocking acquire first, then fall back to the blocking wait.
/// `jitter_floor`/`jitter_ceiling` are exposed only so tests can bound the
/// sleep without depending on wall-clock timing; production callers should
/// use the defaults.
pub async fn rate_limit(
    limiter: &ServiceRateLimiter,
    service: &str,
    tokens: f64,
    timeout: Duration,
) -> Result<(), IngestError> {
    if limiter.acquire(service, tokens).await {
        return Ok(());
    }
    limiter.wait_for_tokens(service, tokens, timeout).await
}

/// Jittered delay helper reused by the retry engine: multiplies `base` by a
/// uniform factor in `[0.5, 1.5)`, matching `RetryManager.get_delay`'s
/// `0.5 + random.random()` jitter.
#[must_use]
pub fn jittered(base: Duration) -> Duration {
    let factor = 0.5 + rand::rng().random::<f64>();
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_matches_python_fallback() {
        let limiter = ServiceRateLimiter::new(RateLimitConfig::default());
        let status = limiter.status("unconfigured").await;
        assert!((status.rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(status.burst, 5);
    }

    #[tokio::test]
    async fn burst_is_exhausted_then_refuses() {
        let limiter = ServiceRateLimiter::new(RateLimitConfig::default());
        for _ in 0..5 {
            assert!(limiter.acquire("svc", 1.0).await);
        }
        assert!(!limiter.acquire("svc", 1.0).await);
    }

    #[tokio::test]
    async fn wait_for_tokens_times_out_when_rate_is_tiny() {
        let limiter = ServiceRateLimiter::new(RateLimitConfig::default());
        limiter
            .configure("slow", RateLimitConfig::new(0.001, 1).expect("valid"))
            .await;
        assert!(limiter.acquire("slow", 1.0).await);
        let result = limiter
            .wait_for_tokens("slow", 1.0, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(IngestError::RateLimitTimeout(_))));
    }

    #[test]
    fn rejects_non_positive_rate() {
        assert!(RateLimitConfig::new(0.0, 5).is_err());
    }

    #[test]
    fn rejects_zero_burst() {
        assert!(RateLimitConfig::new(1.0, 0).is_err());
    }

    #[test]
    fn jittered_stays_within_expected_bounds() {
        let base = Duration::from_secs(1);
        for _ in 0..50 {
            let delay = jittered(base);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(1500));
        }
    }
}
