use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestError;

/// A channel owner/uploader, matching `database_schema.py::PersonRecord`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Person {
    pub id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub person_type: Option<String>,
    pub channel_url: String,
    pub channel_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Person {
    pub fn validate(&self) -> Result<(), IngestError> {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            return Err(IngestError::Validation("name must not be empty".into()));
        }
        if trimmed != self.name {
            return Err(IngestError::Validation(
                "name must not have leading or trailing whitespace".into(),
            ));
        }
        if self.name.chars().count() > 255 {
            return Err(IngestError::Validation(
                "name must be at most 255 characters".into(),
            ));
        }
        if let Some(email) = &self.email {
            if email.chars().any(char::is_whitespace) {
                return Err(IngestError::Validation(
                    "email must not contain whitespace".into(),
                ));
            }
            let parts: Vec<&str> = email.split('@').collect();
            if parts.len() != 2 {
                return Err(IngestError::Validation(
                    "email must contain exactly one '@'".into(),
                ));
            }
            let (local, domain) = (parts[0], parts[1]);
            if local.is_empty() {
                return Err(IngestError::Validation(
                    "email local part must not be empty".into(),
                ));
            }
            if !domain.contains('.') || domain.contains("..") {
                return Err(IngestError::Validation(
                    "email domain must contain a '.' with no consecutive dots".into(),
                ));
            }
        }
        if !self.channel_url.starts_with("https://youtube.com/")
            && !self.channel_url.starts_with("https://www.youtube.com/")
        {
            return Err(IngestError::Validation(
                "channel_url must start with https://youtube.com/ or https://www.youtube.com/"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Download lifecycle of a single video, matching `database_schema.py`'s
/// closed set of `download_status` values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Skipped,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        DownloadStatus::Pending
    }
}

/// A single discovered video, matching `database_schema.py::VideoRecord`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Video {
    pub id: Option<i64>,
    pub person_id: i64,
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration: Option<i64>,
    pub upload_date: Option<DateTime<Utc>>,
    pub view_count: Option<i64>,
    pub s3_path: Option<String>,
    pub uuid: Uuid,
    pub file_size: Option<i64>,
    pub download_status: DownloadStatus,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Video {
    #[must_use]
    pub fn new(person_id: i64, video_id: String, title: String) -> Self {
        Self {
            id: None,
            person_id,
            video_id,
            title,
            description: None,
            duration: None,
            upload_date: None,
            view_count: None,
            s3_path: None,
            uuid: Uuid::new_v4(),
            file_size: None,
            download_status: DownloadStatus::Pending,
            error_message: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.video_id.chars().count() != 11 {
            return Err(IngestError::Validation(
                "video_id must be exactly 11 characters".into(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(IngestError::Validation("title must not be empty".into()));
        }
        if let Some(duration) = self.duration {
            if duration < 0 {
                return Err(IngestError::Validation(
                    "duration must not be negative".into(),
                ));
            }
        }
        if let Some(view_count) = self.view_count {
            if view_count < 0 {
                return Err(IngestError::Validation(
                    "view_count must not be negative".into(),
                ));
            }
        }
        if let Some(file_size) = self.file_size {
            if file_size < 0 {
                return Err(IngestError::Validation(
                    "file_size must not be negative".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Status of a single ingestion job's progress record, matching
/// `database_schema.py::ProgressRecord`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

/// A job's persisted progress row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Progress {
    pub id: Option<i64>,
    pub job_id: String,
    pub input_file: String,
    pub total_channels: i64,
    pub channels_processed: i64,
    pub channels_failed: i64,
    pub channels_skipped: i64,
    pub total_videos: i64,
    pub videos_processed: i64,
    pub videos_failed: i64,
    pub videos_skipped: i64,
    pub bytes_downloaded: i64,
    pub status: ProgressStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.job_id.trim().is_empty() {
            return Err(IngestError::Validation("job_id must not be empty".into()));
        }
        let counters = [
            self.total_channels,
            self.channels_processed,
            self.channels_failed,
            self.channels_skipped,
            self.total_videos,
            self.videos_processed,
            self.videos_failed,
            self.videos_skipped,
            self.bytes_downloaded,
        ];
        if counters.iter().any(|c| *c < 0) {
            return Err(IngestError::Validation(
                "progress counters must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Context recorded alongside every recoverable failure, matching
/// `error_recovery.py::ErrorContext`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_type: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub retry_count: u32,
    pub recovery_strategy: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(error: &IngestError, operation: impl Into<String>) -> Self {
        Self {
            error_type: error.kind_name().to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
            operation: operation.into(),
            retry_count: 0,
            recovery_strategy: None,
        }
    }
}

/// A channel reference parsed from the input file: a `Person` whose
/// `channel_url`/`channel_id` identify the channel to enumerate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRef {
    pub person: Person,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_rejects_blank_name() {
        let person = Person {
            id: None,
            name: String::new(),
            email: None,
            person_type: None,
            channel_url: "https://www.youtube.com/@someone".into(),
            channel_id: None,
            created_at: None,
            updated_at: None,
        };
        assert!(person.validate().is_err());
    }

    #[test]
    fn person_rejects_non_youtube_channel_url() {
        let person = Person {
            id: None,
            name: "Someone".into(),
            email: None,
            person_type: None,
            channel_url: "https://example.com/@someone".into(),
            channel_id: None,
            created_at: None,
            updated_at: None,
        };
        assert!(person.validate().is_err());
    }

    #[test]
    fn person_rejects_email_with_double_at() {
        let person = Person {
            id: None,
            name: "Someone".into(),
            email: Some("@@b.c".into()),
            person_type: None,
            channel_url: "https://www.youtube.com/@someone".into(),
            channel_id: None,
            created_at: None,
            updated_at: None,
        };
        assert!(person.validate().is_err());
    }

    #[test]
    fn person_rejects_email_with_no_dot_in_domain() {
        let person = Person {
            id: None,
            name: "Someone".into(),
            email: Some("a@b".into()),
            person_type: None,
            channel_url: "https://www.youtube.com/@someone".into(),
            channel_id: None,
            created_at: None,
            updated_at: None,
        };
        assert!(person.validate().is_err());
    }

    #[test]
    fn person_accepts_well_formed_email() {
        let person = Person {
            id: None,
            name: "Someone".into(),
            email: Some("a@b.com".into()),
            person_type: None,
            channel_url: "https://www.youtube.com/@someone".into(),
            channel_id: None,
            created_at: None,
            updated_at: None,
        };
        assert!(person.validate().is_ok());
    }

    #[test]
    fn video_requires_eleven_char_id() {
        let video = Video::new(1, "short".into(), "Title".into());
        assert!(video.validate().is_err());
    }

    #[test]
    fn video_accepts_well_formed_record() {
        let video = Video::new(1, "dQw4w9WgXcQ".into(), "Title".into());
        assert!(video.validate().is_ok());
    }

    #[test]
    fn progress_rejects_negative_counters() {
        let progress = Progress {
            id: None,
            job_id: "job-1".into(),
            input_file: "input.txt".into(),
            total_channels: -1,
            channels_processed: 0,
            channels_failed: 0,
            channels_skipped: 0,
            total_videos: 0,
            videos_processed: 0,
            videos_failed: 0,
            videos_skipped: 0,
            bytes_downloaded: 0,
            status: ProgressStatus::Running,
            error_message: None,
            started_at: None,
            completed_at: None,
        };
        assert!(progress.validate().is_err());
    }
}
