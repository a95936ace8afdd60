use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::models::ErrorContext;

/// One failed item plus the context of its failure, matching
/// `error_recovery.py::DeadLetterQueue`'s stored entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetterEntry<T> {
    pub item: T,
    pub error_context: ErrorContext,
}

/// A bounded, oldest-drop-first failure queue, matching
/// `error_recovery.py::DeadLetterQueue` (`deque(maxlen=max_size)`,
/// default `max_size=1000`).
pub struct DeadLetterQueue<T> {
    max_size: usize,
    entries: Mutex<VecDeque<DeadLetterEntry<T>>>,
    persist_path: Option<PathBuf>,
}

impl<T> DeadLetterQueue<T>
where
    T: Clone + Serialize + for<'de> Deserialize<'de>,
{
    #[must_use]
    pub fn new(max_size: usize, persist_path: Option<PathBuf>) -> Self {
        Self {
            max_size,
            entries: Mutex::new(VecDeque::new()),
            persist_path,
        }
    }

    pub async fn add(&self, item: T, error_context: ErrorContext) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_size {
            entries.pop_front();
            warn!("dead letter queue full, dropped oldest entry");
        }
        entries.push_back(DeadLetterEntry { item, error_context });
    }

    pub async fn get_all(&self) -> Vec<DeadLetterEntry<T>> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drains the queue through `processor`, returning `(successful,
    /// failed)` counts. Items that fail again are re-added with
    /// `retry_count` incremented, matching `retry_all`.
    pub async fn retry_all<F, Fut>(&self, processor: F) -> (usize, usize)
    where
        F: Fn(T) -> Fut,
        Fut: std::future::Future<Output = Result<(), IngestError>>,
    {
        let drained: Vec<DeadLetterEntry<T>> = {
            let mut entries = self.entries.lock().await;
            entries.drain(..).collect()
        };
        let mut successful = 0;
        let mut failed = 0;
        for mut entry in drained {
            match processor(entry.item.clone()).await {
                Ok(()) => {
                    successful += 1;
                    info!("dead letter entry succeeded on retry");
                }
                Err(err) => {
                    failed += 1;
                    entry.error_context.retry_count = entry.error_context.retry_count.saturating_add(1);
                    entry.error_context.error_message = err.to_string();
                    let mut entries = self.entries.lock().await;
                    if entries.len() >= self.max_size {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }
        (successful, failed)
    }

    /// Persists the queue as JSON, matching `DeadLetterQueue._save`.
    pub async fn save(&self) -> Result<(), IngestError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let entries: Vec<DeadLetterEntry<T>> = self.entries.lock().await.iter().cloned().collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        write_atomically(path, &json).await
    }

    /// Loads a persisted queue from disk, matching `DeadLetterQueue._load`.
    pub async fn load(&self) -> Result<(), IngestError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        let loaded: VecDeque<DeadLetterEntry<T>> = serde_json::from_str(&contents)
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        let mut entries = self.entries.lock().await;
        *entries = loaded;
        Ok(())
    }
}

async fn write_atomically(path: &Path, contents: &str) -> Result<(), IngestError> {
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
    }
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ErrorContext {
        ErrorContext::new(&IngestError::Transport("boom".into()), "test-op")
    }

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let dlq: DeadLetterQueue<u32> = DeadLetterQueue::new(2, None);
        dlq.add(1, context()).await;
        dlq.add(2, context()).await;
        dlq.add(3, context()).await;
        let entries = dlq.get_all().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].item, 2);
        assert_eq!(entries[1].item, 3);
    }

    #[tokio::test]
    async fn retry_all_requeues_failures_with_incremented_retry_count() {
        let dlq: DeadLetterQueue<u32> = DeadLetterQueue::new(10, None);
        dlq.add(1, context()).await;
        dlq.add(2, context()).await;
        let (successful, failed) = dlq
            .retry_all(|item| async move {
                if item == 1 {
                    Ok(())
                } else {
                    Err(IngestError::Transport("still failing".into()))
                }
            })
            .await;
        assert_eq!(successful, 1);
        assert_eq!(failed, 1);
        let remaining = dlq.get_all().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].error_context.retry_count, 1);
    }

    #[tokio::test]
    async fn save_and_load_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dlq.json");
        let dlq: DeadLetterQueue<u32> = DeadLetterQueue::new(10, Some(path.clone()));
        dlq.add(42, context()).await;
        dlq.save().await.expect("save succeeds");

        let reloaded: DeadLetterQueue<u32> = DeadLetterQueue::new(10, Some(path));
        reloaded.load().await.expect("load succeeds");
        let entries = reloaded.get_all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item, 42);
    }
}
