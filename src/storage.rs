use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::error::IngestError;

/// Where a finished download ends up, matching spec §4 "stream to object
/// storage". The real client is out of scope (Non-goals); this crate talks
/// to it only through this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, local_path: &Path, key: &str) -> Result<String, IngestError>;
    async fn exists(&self, key: &str) -> Result<bool, IngestError>;
}

/// A local-filesystem stand-in for the production object store, used for
/// `download_mode = local_only` and in tests. Mirrors the Python original's
/// S3 upload step closely enough to exercise the same call sites without
/// depending on a real bucket.
pub struct FilesystemStore {
    root: std::path::PathBuf,
}

impl FilesystemStore {
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put_file(&self, local_path: &Path, key: &str) -> Result<String, IngestError> {
        let destination = self.root.join(key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| IngestError::Persistence(err.to_string()))?;
        }
        let mut source = tokio::fs::File::open(local_path)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        let mut buffer = Vec::new();
        source
            .read_to_end(&mut buffer)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        tokio::fs::write(&destination, buffer)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        let path_string = destination.to_string_lossy().to_string();
        info!(key, "stored object");
        Ok(path_string)
    }

    async fn exists(&self, key: &str) -> Result<bool, IngestError> {
        Ok(self.root.join(key).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_file_copies_into_root_under_key() {
        let source_dir = tempfile::tempdir().expect("source dir");
        let dest_dir = tempfile::tempdir().expect("dest dir");
        let source_path = source_dir.path().join("video.mp4");
        tokio::fs::write(&source_path, b"data").await.expect("write source");

        let store = FilesystemStore::new(dest_dir.path());
        let key = "persons/1/dQw4w9WgXcQ.mp4";
        store.put_file(&source_path, key).await.expect("put succeeds");
        assert!(store.exists(key).await.expect("exists check"));
    }
}
