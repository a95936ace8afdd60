use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::error::IngestError;

/// Current on-disk checkpoint format version. Bumped whenever the record
/// shape changes so `load` can refuse (rather than silently misread) an
/// incompatible file — the redesign the spec calls for in place of the
/// Python original's `pickle`-based `RecoveryCheckpoint`, which is neither
/// self-describing nor safe to load across versions.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// A versioned, self-describing checkpoint record, matching
/// `error_recovery.py::RecoveryCheckpoint` in spirit but replacing pickle
/// with a JSON envelope that can be validated on load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint<T> {
    pub format_version: u32,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub state: T,
}

impl<T> Checkpoint<T> {
    #[must_use]
    pub fn new(operation: impl Into<String>, state: T) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            operation: operation.into(),
            timestamp: Utc::now(),
            state,
        }
    }
}

/// Saves/loads checkpoints under `directory/<operation>.checkpoint.json`,
/// matching `RecoveryCheckpoint.save`/`load`'s atomic write.
pub struct CheckpointStore {
    directory: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, operation: &str) -> PathBuf {
        self.directory.join(format!("{operation}.checkpoint.json"))
    }

    pub async fn save<T>(&self, checkpoint: &Checkpoint<T>) -> Result<(), IngestError>
    where
        T: Serialize,
    {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        let path = self.path_for(&checkpoint.operation);
        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        write_atomically(&path, &json).await?;
        info!(operation = %checkpoint.operation, "saved checkpoint");
        Ok(())
    }

    pub async fn load<T>(&self, operation: &str) -> Result<Option<Checkpoint<T>>, IngestError>
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(operation);
        if !path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        let checkpoint: Checkpoint<T> = serde_json::from_str(&contents)
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(IngestError::Persistence(format!(
                "checkpoint '{operation}' has unsupported format version {}",
                checkpoint.format_version
            )));
        }
        Ok(Some(checkpoint))
    }

    /// Deletes checkpoints older than `max_age_days`, matching
    /// `MassDownloadCoordinator.cleanup_old_checkpoints(days=7)`.
    pub async fn cleanup_older_than(&self, max_age_days: i64) -> Result<usize, IngestError> {
        if !self.directory.exists() {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut removed = 0;
        let mut read_dir = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                if let Ok(generic) = serde_json::from_str::<Checkpoint<serde_json::Value>>(&contents) {
                    if generic.timestamp < cutoff {
                        tokio::fs::remove_file(&path)
                            .await
                            .map_err(|err| IngestError::Persistence(err.to_string()))?;
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

async fn write_atomically(path: &Path, contents: &str) -> Result<(), IngestError> {
    let tmp_path = path.with_extension("tmp");
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
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct ChannelState {
        channel_url: String,
        videos_seen: u32,
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        let checkpoint = Checkpoint::new(
            "channel-ingest",
            ChannelState {
                channel_url: "https://www.youtube.com/@someone".into(),
                videos_seen: 12,
            },
        );
        store.save(&checkpoint).await.expect("save succeeds");

        let loaded: Option<Checkpoint<ChannelState>> = store
            .load("channel-ingest")
            .await
            .expect("load succeeds");
        let loaded = loaded.expect("checkpoint present");
        assert_eq!(loaded.state, checkpoint.state);
        assert_eq!(loaded.format_version, CHECKPOINT_FORMAT_VERSION);
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        let loaded: Option<Checkpoint<ChannelState>> =
            store.load("missing").await.expect("load succeeds");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn rejects_unsupported_format_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        let path = dir.path().join("bad.checkpoint.json");
        tokio::fs::write(
            &path,
            serde_json::json!({
                "format_version": 999,
                "operation": "bad",
                "timestamp": Utc::now(),
                "state": { "channel_url": "x", "videos_seen": 0 }
            })
            .to_string(),
        )
        .await
        .expect("write succeeds");

        let loaded: Result<Option<Checkpoint<ChannelState>>, IngestError> =
            store.load("bad").await;
        assert!(loaded.is_err());
    }
}
