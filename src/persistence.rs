use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{DownloadStatus, Person, Progress, ProgressStatus, Video};

/// Storage boundary for people, videos, and job progress, matching §4.I.
/// `SqliteStore` is the production implementation; `InMemoryStore` is the
/// "no-store" mode from spec §9's Design Notes, used by tests and dry runs.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_person(&self, person: &Person) -> Result<i64, IngestError>;
    async fn find_person_by_channel_url(&self, channel_url: &str) -> Result<Option<Person>, IngestError>;
    async fn delete_person(&self, person_id: i64) -> Result<(), IngestError>;

    async fn upsert_video(&self, video: &Video) -> Result<i64, IngestError>;
    async fn video_exists(&self, video_id: &str) -> Result<bool, IngestError>;
    async fn update_video_status(
        &self,
        video_id: &str,
        status: DownloadStatus,
        error_message: Option<String>,
    ) -> Result<(), IngestError>;
    async fn pending_videos_for_person(&self, person_id: i64) -> Result<Vec<Video>, IngestError>;
    async fn delete_video(&self, video_id: &str) -> Result<(), IngestError>;

    async fn save_progress(&self, progress: &Progress) -> Result<(), IngestError>;
    async fn load_progress(&self, job_id: &str) -> Result<Option<Progress>, IngestError>;

    /// A trivial round-trip used by the `/healthz` probe (§10.2).
    async fn health_check(&self) -> Result<(), IngestError>;
}

/// The persisted schema (§10.9), created at startup if absent.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS persons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0 AND length(name) <= 255),
    email TEXT,
    type TEXT,
    channel_url TEXT NOT NULL,
    channel_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_persons_channel_id ON persons(channel_id);
CREATE INDEX IF NOT EXISTS idx_persons_email ON persons(email);

CREATE TRIGGER IF NOT EXISTS persons_updated_at
AFTER UPDATE ON persons
BEGIN
    UPDATE persons SET updated_at = datetime('now') WHERE id = NEW.id;
END;

CREATE TABLE IF NOT EXISTS videos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
    video_id TEXT NOT NULL UNIQUE CHECK (length(video_id) = 11),
    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
    description TEXT,
    duration INTEGER CHECK (duration IS NULL OR duration >= 0),
    upload_date TEXT,
    view_count INTEGER CHECK (view_count IS NULL OR view_count >= 0),
    s3_path TEXT,
    uuid TEXT NOT NULL UNIQUE,
    file_size INTEGER CHECK (file_size IS NULL OR file_size >= 0),
    download_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (download_status IN ('pending', 'downloading', 'completed', 'failed', 'skipped')),
    error_message TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_videos_person_id ON videos(person_id);
CREATE INDEX IF NOT EXISTS idx_videos_video_id ON videos(video_id);
CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(download_status);
CREATE INDEX IF NOT EXISTS idx_videos_uuid ON videos(uuid);

CREATE TRIGGER IF NOT EXISTS videos_updated_at
AFTER UPDATE ON videos
BEGIN
    UPDATE videos SET updated_at = datetime('now') WHERE id = NEW.id;
END;

CREATE TABLE IF NOT EXISTS progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE CHECK (length(trim(job_id)) > 0),
    input_file TEXT NOT NULL,
    total_channels INTEGER NOT NULL DEFAULT 0 CHECK (total_channels >= 0),
    channels_processed INTEGER NOT NULL DEFAULT 0 CHECK (channels_processed >= 0),
    channels_failed INTEGER NOT NULL DEFAULT 0 CHECK (channels_failed >= 0),
    channels_skipped INTEGER NOT NULL DEFAULT 0 CHECK (channels_skipped >= 0),
    total_videos INTEGER NOT NULL DEFAULT 0 CHECK (total_videos >= 0),
    videos_processed INTEGER NOT NULL DEFAULT 0 CHECK (videos_processed >= 0),
    videos_failed INTEGER NOT NULL DEFAULT 0 CHECK (videos_failed >= 0),
    videos_skipped INTEGER NOT NULL DEFAULT 0 CHECK (videos_skipped >= 0),
    bytes_downloaded INTEGER NOT NULL DEFAULT 0 CHECK (bytes_downloaded >= 0),
    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed', 'paused')),
    error_message TEXT,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_progress_job_id ON progress(job_id);
CREATE INDEX IF NOT EXISTS idx_progress_status ON progress(status);
CREATE INDEX IF NOT EXISTS idx_progress_started_at ON progress(started_at);
";

pub async fn init_pool(database_url: &str) -> Result<SqlitePool, IngestError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
    for statement in SCHEMA.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed)
            .execute(&pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
    }
    info!("database schema ready");
    Ok(pool)
}

#[derive(FromRow)]
struct PersonRow {
    id: i64,
    name: String,
    email: Option<String>,
    r#type: Option<String>,
    channel_url: String,
    channel_id: Option<String>,
}

#[derive(FromRow)]
struct VideoRow {
    id: i64,
    person_id: i64,
    video_id: String,
    title: String,
    description: Option<String>,
    duration: Option<i64>,
    upload_date: Option<String>,
    view_count: Option<i64>,
    s3_path: Option<String>,
    uuid: String,
    file_size: Option<i64>,
    download_status: String,
    error_message: Option<String>,
}

fn status_from_str(value: &str) -> DownloadStatus {
    match value {
        "downloading" => DownloadStatus::Downloading,
        "completed" => DownloadStatus::Completed,
        "failed" => DownloadStatus::Failed,
        "skipped" => DownloadStatus::Skipped,
        _ => DownloadStatus::Pending,
    }
}

fn status_to_str(status: DownloadStatus) -> &'static str {
    match status {
        DownloadStatus::Pending => "pending",
        DownloadStatus::Downloading => "downloading",
        DownloadStatus::Completed => "completed",
        DownloadStatus::Failed => "failed",
        DownloadStatus::Skipped => "skipped",
    }
}

impl From<VideoRow> for Video {
    fn from(row: VideoRow) -> Self {
        Video {
            id: Some(row.id),
            person_id: row.person_id,
            video_id: row.video_id,
            title: row.title,
            description: row.description,
            duration: row.duration,
            upload_date: row
                .upload_date
                .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            view_count: row.view_count,
            s3_path: row.s3_path,
            uuid: Uuid::parse_str(&row.uuid).unwrap_or_else(|_| Uuid::new_v4()),
            file_size: row.file_size,
            download_status: status_from_str(&row.download_status),
            error_message: row.error_message,
            created_at: None,
            updated_at: None,
        }
    }
}

impl From<PersonRow> for Person {
    fn from(row: PersonRow) -> Self {
        Person {
            id: Some(row.id),
            name: row.name,
            email: row.email,
            person_type: row.r#type,
            channel_url: row.channel_url,
            channel_id: row.channel_id,
            created_at: None,
            updated_at: None,
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_person(&self, person: &Person) -> Result<i64, IngestError> {
        person.validate()?;
        if let Some(existing) = self.find_person_by_channel_url(&person.channel_url).await? {
            let id = existing.id.ok_or_else(|| IngestError::Persistence("missing person id".into()))?;
            sqlx::query("UPDATE persons SET name = ?, email = ?, type = ?, channel_id = ? WHERE id = ?")
                .bind(&person.name)
                .bind(&person.email)
                .bind(&person.person_type)
                .bind(&person.channel_id)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|err| IngestError::Persistence(err.to_string()))?;
            return Ok(id);
        }
        let result = sqlx::query(
            "INSERT INTO persons (name, email, type, channel_url, channel_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&person.name)
        .bind(&person.email)
        .bind(&person.person_type)
        .bind(&person.channel_url)
        .bind(&person.channel_id)
        .execute(&self.pool)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    async fn find_person_by_channel_url(&self, channel_url: &str) -> Result<Option<Person>, IngestError> {
        let row = sqlx::query_as::<_, PersonRow>(
            "SELECT id, name, email, type, channel_url, channel_id FROM persons WHERE channel_url = ?",
        )
        .bind(channel_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(row.map(Person::from))
    }

    async fn delete_person(&self, person_id: i64) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM persons WHERE id = ?")
            .bind(person_id)
            .execute(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(())
    }

    async fn upsert_video(&self, video: &Video) -> Result<i64, IngestError> {
        video.validate()?;
        let existing: Option<i64> = sqlx::query("SELECT id FROM videos WHERE video_id = ?")
            .bind(&video.video_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?
            .map(|row| row.get::<i64, _>("id"));

        if let Some(id) = existing {
            sqlx::query(
                "UPDATE videos SET title = ?, description = ?, duration = ?, upload_date = ?, \
                 view_count = ?, s3_path = ?, file_size = ?, download_status = ?, error_message = ? \
                 WHERE id = ?",
            )
            .bind(&video.title)
            .bind(&video.description)
            .bind(video.duration)
            .bind(video.upload_date.map(|dt| dt.to_rfc3339()))
            .bind(video.view_count)
            .bind(&video.s3_path)
            .bind(video.file_size)
            .bind(status_to_str(video.download_status))
            .bind(&video.error_message)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO videos (person_id, video_id, title, description, duration, upload_date, \
             view_count, s3_path, uuid, file_size, download_status, error_message) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(video.person_id)
        .bind(&video.video_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.duration)
        .bind(video.upload_date.map(|dt| dt.to_rfc3339()))
        .bind(video.view_count)
        .bind(&video.s3_path)
        .bind(video.uuid.to_string())
        .bind(video.file_size)
        .bind(status_to_str(video.download_status))
        .bind(&video.error_message)
        .execute(&self.pool)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    async fn video_exists(&self, video_id: &str) -> Result<bool, IngestError> {
        let row = sqlx::query("SELECT 1 FROM videos WHERE video_id = ?")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(row.is_some())
    }

    async fn update_video_status(
        &self,
        video_id: &str,
        status: DownloadStatus,
        error_message: Option<String>,
    ) -> Result<(), IngestError> {
        sqlx::query("UPDATE videos SET download_status = ?, error_message = ? WHERE video_id = ?")
            .bind(status_to_str(status))
            .bind(&error_message)
            .bind(video_id)
            .execute(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(())
    }

    async fn pending_videos_for_person(&self, person_id: i64) -> Result<Vec<Video>, IngestError> {
        let rows = sqlx::query_as::<_, VideoRow>(
            "SELECT id, person_id, video_id, title, description, duration, upload_date, view_count, \
             s3_path, uuid, file_size, download_status, error_message FROM videos \
             WHERE person_id = ? AND download_status = 'pending'",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(rows.into_iter().map(Video::from).collect())
    }

    async fn delete_video(&self, video_id: &str) -> Result<(), IngestError> {
        sqlx::query("DELETE FROM videos WHERE video_id = ?")
            .bind(video_id)
            .execute(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(())
    }

    async fn save_progress(&self, progress: &Progress) -> Result<(), IngestError> {
        progress.validate()?;
        let status = match progress.status {
            ProgressStatus::Running => "running",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
            ProgressStatus::Paused => "paused",
        };
        sqlx::query(
            "INSERT INTO progress (job_id, input_file, total_channels, channels_processed, \
             channels_failed, channels_skipped, total_videos, videos_processed, videos_failed, \
             videos_skipped, bytes_downloaded, status, error_message, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET \
             total_channels = excluded.total_channels, channels_processed = excluded.channels_processed, \
             channels_failed = excluded.channels_failed, channels_skipped = excluded.channels_skipped, \
             total_videos = excluded.total_videos, videos_processed = excluded.videos_processed, \
             videos_failed = excluded.videos_failed, videos_skipped = excluded.videos_skipped, \
             bytes_downloaded = excluded.bytes_downloaded, status = excluded.status, \
             error_message = excluded.error_message, completed_at = excluded.completed_at",
        )
        .bind(&progress.job_id)
        .bind(&progress.input_file)
        .bind(progress.total_channels)
        .bind(progress.channels_processed)
        .bind(progress.channels_failed)
        .bind(progress.channels_skipped)
        .bind(progress.total_videos)
        .bind(progress.videos_processed)
        .bind(progress.videos_failed)
        .bind(progress.videos_skipped)
        .bind(progress.bytes_downloaded)
        .bind(status)
        .bind(&progress.error_message)
        .bind(progress.started_at.map(|dt| dt.to_rfc3339()))
        .bind(progress.completed_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(())
    }

    async fn load_progress(&self, job_id: &str) -> Result<Option<Progress>, IngestError> {
        let row = sqlx::query(
            "SELECT job_id, input_file, total_channels, channels_processed, channels_failed, \
             channels_skipped, total_videos, videos_processed, videos_failed, videos_skipped, \
             bytes_downloaded, status, error_message, started_at, completed_at FROM progress \
             WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let status_str: String = row.get("status");
        let status = match status_str.as_str() {
            "completed" => ProgressStatus::Completed,
            "failed" => ProgressStatus::Failed,
            "paused" => ProgressStatus::Paused,
            _ => ProgressStatus::Running,
        };
        let started_at: Option<String> = row.get("started_at");
        let completed_at: Option<String> = row.get("completed_at");
        Ok(Some(Progress {
            id: None,
            job_id: row.get("job_id"),
            input_file: row.get("input_file"),
            total_channels: row.get("total_channels"),
            channels_processed: row.get("channels_processed"),
            channels_failed: row.get("channels_failed"),
            channels_skipped: row.get("channels_skipped"),
            total_videos: row.get("total_videos"),
            videos_processed: row.get("videos_processed"),
            videos_failed: row.get("videos_failed"),
            videos_skipped: row.get("videos_skipped"),
            bytes_downloaded: row.get("bytes_downloaded"),
            status,
            error_message: row.get("error_message"),
            started_at: started_at.and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok()).map(|dt| dt.with_timezone(&Utc)),
            completed_at: completed_at.and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok()).map(|dt| dt.with_timezone(&Utc)),
        }))
    }

    async fn health_check(&self) -> Result<(), IngestError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        Ok(())
    }
}

/// In-memory "no-store" implementation for tests and dry runs (spec §9).
#[derive(Default)]
pub struct InMemoryStore {
    persons: Mutex<Vec<Person>>,
    videos: Mutex<Vec<Video>>,
    progress: Mutex<Vec<Progress>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_person(&self, person: &Person) -> Result<i64, IngestError> {
        person.validate()?;
        let mut persons = self.persons.lock().await;
        if let Some(existing) = persons.iter_mut().find(|p| p.channel_url == person.channel_url) {
            existing.name = person.name.clone();
            existing.email = person.email.clone();
            existing.channel_id = person.channel_id.clone();
            return Ok(existing.id.unwrap_or(0));
        }
        let id = i64::try_from(persons.len()).unwrap_or(0) + 1;
        let mut stored = person.clone();
        stored.id = Some(id);
        persons.push(stored);
        Ok(id)
    }

    async fn find_person_by_channel_url(&self, channel_url: &str) -> Result<Option<Person>, IngestError> {
        Ok(self
            .persons
            .lock()
            .await
            .iter()
            .find(|p| p.channel_url == channel_url)
            .cloned())
    }

    async fn delete_person(&self, person_id: i64) -> Result<(), IngestError> {
        self.persons.lock().await.retain(|p| p.id != Some(person_id));
        Ok(())
    }

    async fn upsert_video(&self, video: &Video) -> Result<i64, IngestError> {
        video.validate()?;
        let mut videos = self.videos.lock().await;
        if let Some(existing) = videos.iter_mut().find(|v| v.video_id == video.video_id) {
            *existing = video.clone();
            return Ok(existing.id.unwrap_or(0));
        }
        let id = i64::try_from(videos.len()).unwrap_or(0) + 1;
        let mut stored = video.clone();
        stored.id = Some(id);
        videos.push(stored);
        Ok(id)
    }

    async fn video_exists(&self, video_id: &str) -> Result<bool, IngestError> {
        Ok(self.videos.lock().await.iter().any(|v| v.video_id == video_id))
    }

    async fn update_video_status(
        &self,
        video_id: &str,
        status: DownloadStatus,
        error_message: Option<String>,
    ) -> Result<(), IngestError> {
        let mut videos = self.videos.lock().await;
        if let Some(video) = videos.iter_mut().find(|v| v.video_id == video_id) {
            video.download_status = status;
            video.error_message = error_message;
        }
        Ok(())
    }

    async fn pending_videos_for_person(&self, person_id: i64) -> Result<Vec<Video>, IngestError> {
        Ok(self
            .videos
            .lock()
            .await
            .iter()
            .filter(|v| v.person_id == person_id && v.download_status == DownloadStatus::Pending)
            .cloned()
            .collect())
    }

    async fn delete_video(&self, video_id: &str) -> Result<(), IngestError> {
        self.videos.lock().await.retain(|v| v.video_id != video_id);
        Ok(())
    }

    async fn save_progress(&self, progress: &Progress) -> Result<(), IngestError> {
        progress.validate()?;
        let mut all = self.progress.lock().await;
        if let Some(existing) = all.iter_mut().find(|p| p.job_id == progress.job_id) {
            *existing = progress.clone();
        } else {
            all.push(progress.clone());
        }
        Ok(())
    }

    async fn load_progress(&self, job_id: &str) -> Result<Option<Progress>, IngestError> {
        Ok(self.progress.lock().await.iter().find(|p| p.job_id == job_id).cloned())
    }

    async fn health_check(&self) -> Result<(), IngestError> {
        Ok(())
    }
}
