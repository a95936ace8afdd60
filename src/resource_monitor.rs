use std::collections::VecDeque;
use std::time::Duration;

use sysinfo::System;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Mirrors `concurrent_processor.py::ResourceStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Normal,
    Warning,
    Critical,
}

/// Mirrors `concurrent_processor.py::ResourceLimits`.
#[derive(Clone, Copy, Debug)]
pub struct ResourceLimits {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub check_interval: Duration,
    pub throttle_factor: f64,
    pub min_concurrent: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            max_memory_percent: 80.0,
            check_interval: Duration::from_secs(5),
            throttle_factor: 0.5,
            min_concurrent: 1,
        }
    }
}

/// A single sample, matching `concurrent_processor.py::ResourceMetrics`,
/// including its `__post_init__` status derivation.
#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub thread_count: usize,
    pub queue_size: usize,
    pub status: ResourceStatus,
}

impl ResourceMetrics {
    #[must_use]
    pub fn new(cpu_percent: f64, memory_percent: f64, thread_count: usize, queue_size: usize) -> Self {
        let status = if cpu_percent > 90.0 || memory_percent > 90.0 {
            ResourceStatus::Critical
        } else if cpu_percent > 75.0 || memory_percent > 75.0 {
            ResourceStatus::Warning
        } else {
            ResourceStatus::Normal
        };
        Self {
            cpu_percent,
            memory_percent,
            thread_count,
            queue_size,
            status,
        }
    }
}

/// Supplies current CPU/memory readings. Abstracted so tests can feed
/// synthetic load without depending on the host machine, matching the
/// Python original's reliance on `psutil` with a conservative fallback
/// when sampling fails.
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> (f64, f64);
}

/// Falls back to a conservative 50%/50% estimate, matching
/// `ResourceMonitor.get_current_metrics`'s error path.
pub struct ConservativeSampler;

impl SystemSampler for ConservativeSampler {
    fn sample(&self) -> (f64, f64) {
        (50.0, 50.0)
    }
}

/// Reads real host CPU/memory usage via `sysinfo`, the production sampler
/// wired in by `Coordinator::new`. Mirrors the Python original's `psutil`
/// calls; falls back to `ConservativeSampler`'s estimate if the host
/// reports zero total memory (can happen under some containers/cgroups).
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&self) -> (f64, f64) {
        let Ok(mut system) = self.system.try_lock() else {
            return (50.0, 50.0);
        };
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu = f64::from(system.global_cpu_usage());
        let total = system.total_memory();
        if total == 0 {
            return (cpu, 50.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let memory = (system.used_memory() as f64 / total as f64) * 100.0;
        (cpu, memory)
    }
}

const HISTORY_CAPACITY: usize = 100;
const ROLLING_WINDOW: usize = 3;

/// Samples resource usage on an interval and recommends throttled
/// concurrency, matching `concurrent_processor.py::ResourceMonitor`.
pub struct ResourceMonitor {
    limits: ResourceLimits,
    sampler: Box<dyn SystemSampler>,
    history: Mutex<VecDeque<ResourceMetrics>>,
    shutdown: watch::Sender<bool>,
}

impl ResourceMonitor {
    #[must_use]
    pub fn new(limits: ResourceLimits, sampler: Box<dyn SystemSampler>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            limits,
            sampler,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            shutdown,
        }
    }

    pub async fn record_sample(&self, thread_count: usize, queue_size: usize) -> ResourceMetrics {
        let (cpu, memory) = self.sampler.sample();
        let metrics = ResourceMetrics::new(cpu, memory, thread_count, queue_size);
        let mut history = self.history.lock().await;
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(metrics);
        metrics
    }

    /// Spawns the periodic sampling loop, matching `start_monitoring`'s
    /// background thread. Stops when `stop()` is called.
    pub fn start(self: std::sync::Arc<Self>, thread_count: impl Fn() -> usize + Send + Sync + 'static) {
        let interval = self.limits.check_interval;
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.record_sample(thread_count(), 0).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("resource monitor stopping");
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Average CPU/memory over the last `ROLLING_WINDOW` samples, then
    /// `max(min_concurrent, base*throttle_factor)` if either exceeds its
    /// configured max, matching `get_recommended_concurrency`.
    pub async fn recommended_concurrency(&self, base_concurrency: usize) -> usize {
        let history = self.history.lock().await;
        if history.is_empty() {
            return base_concurrency;
        }
        let window: Vec<&ResourceMetrics> = history.iter().rev().take(ROLLING_WINDOW).collect();
        let count = window.len() as f64;
        let avg_cpu = window.iter().map(|m| m.cpu_percent).sum::<f64>() / count;
        let avg_memory = window.iter().map(|m| m.memory_percent).sum::<f64>() / count;
        if avg_cpu > self.limits.max_cpu_percent || avg_memory > self.limits.max_memory_percent {
            let throttled = (base_concurrency as f64 * self.limits.throttle_factor) as usize;
            throttled.max(self.limits.min_concurrent)
        } else {
            base_concurrency
        }
    }

    pub async fn latest(&self) -> Option<ResourceMetrics> {
        self.history.lock().await.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSampler {
        cpu: f64,
        memory: f64,
    }

    impl SystemSampler for FixedSampler {
        fn sample(&self) -> (f64, f64) {
            (self.cpu, self.memory)
        }
    }

    #[test]
    fn status_bands_match_thresholds() {
        assert_eq!(ResourceMetrics::new(50.0, 50.0, 1, 0).status, ResourceStatus::Normal);
        assert_eq!(ResourceMetrics::new(80.0, 50.0, 1, 0).status, ResourceStatus::Warning);
        assert_eq!(ResourceMetrics::new(95.0, 50.0, 1, 0).status, ResourceStatus::Critical);
    }

    #[tokio::test]
    async fn recommends_base_when_usage_is_low() {
        let monitor = ResourceMonitor::new(ResourceLimits::default(), Box::new(FixedSampler { cpu: 10.0, memory: 10.0 }));
        monitor.record_sample(4, 0).await;
        assert_eq!(monitor.recommended_concurrency(3).await, 3);
    }

    #[tokio::test]
    async fn throttles_when_rolling_average_exceeds_limits() {
        let monitor = ResourceMonitor::new(ResourceLimits::default(), Box::new(FixedSampler { cpu: 95.0, memory: 95.0 }));
        for _ in 0..3 {
            monitor.record_sample(4, 0).await;
        }
        assert_eq!(monitor.recommended_concurrency(4).await, 2);
    }

    #[tokio::test]
    async fn never_recommends_below_min_concurrent() {
        let limits = ResourceLimits {
            min_concurrent: 2,
            throttle_factor: 0.1,
            ..ResourceLimits::default()
        };
        let monitor = ResourceMonitor::new(limits, Box::new(FixedSampler { cpu: 99.0, memory: 99.0 }));
        for _ in 0..3 {
            monitor.record_sample(4, 0).await;
        }
        assert_eq!(monitor.recommended_concurrency(3).await, 2);
    }
}
