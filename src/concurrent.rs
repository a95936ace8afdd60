use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::resource_monitor::ResourceMonitor;

/// A semaphore whose permit count can be grown or shrunk at runtime,
/// matching `concurrent_processor.py::ConcurrentProcessor._resize_thread_pool`
/// (there done by swapping `ThreadPoolExecutor`s; here done by adding or
/// forgetting permits on the same `Semaphore`).
struct ResizableSemaphore {
    semaphore: Arc<Semaphore>,
    size: AtomicUsize,
}

impl ResizableSemaphore {
    fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size: AtomicUsize::new(size),
        }
    }

    fn resize(&self, new_size: usize) {
        let current = self.size.swap(new_size, Ordering::SeqCst);
        if new_size > current {
            self.semaphore.add_permits(new_size - current);
        } else if new_size < current {
            let to_remove = current - new_size;
            let semaphore = self.semaphore.clone();
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many(to_remove as u32).await {
                    permits.forget();
                }
            });
        }
    }
}

/// Outcome of draining a batch of tasks, matching `wait_for_completion`.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// Tracks active/completed/failed task counts and two independently
/// resizable permit pools, matching `concurrent_processor.py::ConcurrentProcessor`.
pub struct ConcurrentProcessor {
    channel_slots: ResizableSemaphore,
    download_slots: ResizableSemaphore,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    active_tasks: AtomicUsize,
    resource_monitor: Option<Arc<ResourceMonitor>>,
}

impl ConcurrentProcessor {
    #[must_use]
    pub fn new(
        max_concurrent_channels: usize,
        max_concurrent_downloads: usize,
        resource_monitor: Option<Arc<ResourceMonitor>>,
    ) -> Self {
        Self {
            channel_slots: ResizableSemaphore::new(max_concurrent_channels),
            download_slots: ResizableSemaphore::new(max_concurrent_downloads),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            resource_monitor,
        }
    }

    /// Consults the resource monitor (if any) and resizes the channel pool
    /// before running `task`, matching `submit_channel_task`'s resize check.
    pub async fn run_channel_task<F, Fut, T>(&self, base_concurrency: usize, task: F) -> Result<T, IngestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        if let Some(monitor) = &self.resource_monitor {
            let recommended = monitor.recommended_concurrency(base_concurrency).await;
            self.channel_slots.resize(recommended);
        }
        self.run_with_slots(&self.channel_slots, task).await
    }

    pub async fn run_download_task<F, Fut, T>(&self, task: F) -> Result<T, IngestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        self.run_with_slots(&self.download_slots, task).await
    }

    async fn run_with_slots<F, Fut, T>(&self, slots: &ResizableSemaphore, task: F) -> Result<T, IngestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let _permit = slots
            .semaphore
            .acquire()
            .await
            .map_err(|_| IngestError::Cancelled)?;
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        let result = task().await;
        self.active_tasks.fetch_sub(1, Ordering::SeqCst);
        match &result {
            Ok(_) => {
                self.completed_tasks.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                self.failed_tasks.fetch_add(1, Ordering::SeqCst);
                warn!(error = %err, "concurrent task failed");
            }
        }
        result
    }

    #[must_use]
    pub fn status(&self) -> ConcurrentStatus {
        ConcurrentStatus {
            active_tasks: self.active_tasks.load(Ordering::SeqCst),
            completed_tasks: self.completed_tasks.load(Ordering::SeqCst),
            failed_tasks: self.failed_tasks.load(Ordering::SeqCst),
            channel_permits_available: self.channel_slots.semaphore.available_permits(),
            download_permits_available: self.download_slots.semaphore.available_permits(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConcurrentStatus {
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub channel_permits_available: usize,
    pub download_permits_available: usize,
}

/// Awaits every future in `tasks`, tolerating individual failures, matching
/// `wait_for_completion`'s `{total, completed, failed, success_rate}` shape.
pub async fn wait_for_completion<T>(tasks: Vec<impl Future<Output = Result<T, IngestError>>>) -> BatchOutcome {
    let total = tasks.len();
    let results = futures_join_all(tasks).await;
    let completed = results.iter().filter(|r| r.is_ok()).count();
    let failed = total - completed;
    let success_rate = if total == 0 { 0.0 } else { completed as f64 / total as f64 };
    info!(total, completed, failed, "batch complete");
    BatchOutcome {
        total,
        completed,
        failed,
        success_rate,
    }
}

async fn futures_join_all<T>(tasks: Vec<impl Future<Output = Result<T, IngestError>>>) -> Vec<Result<T, IngestError>> {
    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        handles.push(task);
    }
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_completed_and_failed_counts() {
        let processor = ConcurrentProcessor::new(2, 2, None);
        let _ = processor
            .run_channel_task(2, || async { Ok::<_, IngestError>(()) })
            .await;
        let _: Result<(), IngestError> = processor
            .run_channel_task(2, || async { Err(IngestError::Transport("boom".into())) })
            .await;
        let status = processor.status();
        assert_eq!(status.completed_tasks, 1);
        assert_eq!(status.failed_tasks, 1);
    }

    #[tokio::test]
    async fn wait_for_completion_reports_success_rate() {
        let tasks: Vec<_> = vec![
            Box::pin(async { Ok::<_, IngestError>(()) }) as std::pin::Pin<Box<dyn Future<Output = Result<(), IngestError>>>>,
            Box::pin(async { Err(IngestError::Transport("boom".into())) }),
        ];
        let outcome = wait_for_completion(tasks).await;
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.failed, 1);
        assert!((outcome.success_rate - 0.5).abs() < f64::EPSILON);
    }
}
