use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::IngestError;

const GENERIC_STRING_CAP: usize = 1000;
const DESCRIPTION_CAP: usize = 5000;
const UPLOADER_CAP: usize = 200;
const TAGS_CAP: usize = 50;
const CATEGORIES_CAP: usize = 10;
const MAX_DURATION_SECONDS: i64 = 86_400;

/// Mirrors `channel_discovery.py::ChannelInfo`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub channel_url: String,
    pub title: String,
    pub description: Option<String>,
    pub subscriber_count: Option<i64>,
    pub video_count: Option<i64>,
    pub playlist_id: Option<String>,
}

impl ChannelInfo {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.channel_id.chars().count() < 5 {
            return Err(IngestError::Validation(
                "channel_id must be at least 5 characters".into(),
            ));
        }
        if !self.channel_url.starts_with("https://youtube.com/")
            && !self.channel_url.starts_with("https://www.youtube.com/")
        {
            return Err(IngestError::Validation(
                "channel_url must start with https://youtube.com/ or https://www.youtube.com/"
                    .into(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(IngestError::Validation("title must not be empty".into()));
        }
        for count in [self.subscriber_count, self.video_count] {
            if let Some(value) = count {
                if value < 0 {
                    return Err(IngestError::Validation(
                        "counts must not be negative".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Mirrors `channel_discovery.py::VideoMetadata`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration: Option<i64>,
    pub upload_date: Option<DateTime<Utc>>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: String,
    pub channel_id: Option<String>,
    pub uploader: Option<String>,
    pub is_live: bool,
    pub age_restricted: bool,
}

impl VideoMetadata {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.video_id.chars().count() != 11 {
            return Err(IngestError::Validation(
                "video_id must be exactly 11 characters".into(),
            ));
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
        if !self.video_url.starts_with("https://www.youtube.com/")
            && !self.video_url.starts_with("https://youtube.com/")
        {
            return Err(IngestError::Validation(
                "video_url must be a youtube.com URL".into(),
            ));
        }
        Ok(())
    }
}

/// In-memory duplicate-detection table, matching `channel_discovery.py`'s
/// dedup table: a set of seen video_ids plus a video_id -> UUID map.
/// `load_existing` seeds it (from a checkpoint or a prior enumeration
/// pass), `is_duplicate` checks before a video is processed, `mark_processed`
/// records one as seen along with the UUID it was assigned. The database
/// remains the durable source of truth for dedup across process restarts;
/// this table only avoids redundant `Store::video_exists` round-trips
/// within a single run once it has been seeded.
#[derive(Default)]
pub struct DedupTable {
    seen: std::collections::HashMap<String, Uuid>,
}

impl DedupTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_existing(&mut self, video_ids: impl IntoIterator<Item = (String, Uuid)>) {
        self.seen.extend(video_ids);
    }

    #[must_use]
    pub fn is_duplicate(&self, video_id: &str) -> bool {
        self.seen.contains_key(video_id)
    }

    /// Idempotent: marking an already-seen id again keeps its first UUID.
    pub fn mark_processed(&mut self, video_id: impl Into<String>, uuid: Uuid) {
        self.seen.entry(video_id.into()).or_insert(uuid);
    }
}

/// The external metadata-extraction process, isolated behind a trait so
/// tests and the coordinator can swap in a stub. Never implemented here
/// beyond the `yt-dlp`-shaped process contract the spec names explicitly;
/// the extractor's own internals are out of scope.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn validate_channel_url(&self, raw_url: &str) -> Result<String, IngestError>;
    async fn extract_channel_info(&self, channel_url: &str) -> Result<ChannelInfo, IngestError>;
    async fn enumerate_channel_videos(
        &self,
        channel_url: &str,
        max_videos: Option<u32>,
    ) -> Result<Vec<VideoMetadata>, IngestError>;
    async fn get_video_details(&self, video_id: &str) -> Result<VideoMetadata, IngestError>;
}

/// Drives the `yt-dlp` binary's flat-playlist JSON-lines protocol.
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    pub async fn check_available(&self) -> Result<(), IngestError> {
        let result = timeout(
            Duration::from_secs(10),
            Command::new(&self.binary)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;
        match result {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(_)) => Err(IngestError::DependencyMissing(format!(
                "{} --version exited with a failure status",
                self.binary
            ))),
            Ok(Err(err)) => Err(IngestError::DependencyMissing(format!(
                "{} not runnable: {err}",
                self.binary
            ))),
            Err(_) => Err(IngestError::DependencyMissing(format!(
                "{} --version timed out",
                self.binary
            ))),
        }
    }

    async fn run_json_lines(
        &self,
        args: &[&str],
        call_timeout: Duration,
    ) -> Result<Vec<Value>, IngestError> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|err| IngestError::DependencyMissing(err.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IngestError::Transport("no stdout pipe".into()))?;
        let mut lines = tokio::io::BufReader::new(stdout).lines();
        let mut values = Vec::new();
        let read_result = timeout(call_timeout, async {
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => values.push(value),
                    Err(err) => warn!(error = %err, "skipping malformed extractor output line"),
                }
            }
        })
        .await;
        let status = child
            .wait()
            .await
            .map_err(|err| IngestError::Transport(err.to_string()))?;
        if read_result.is_err() {
            return Err(IngestError::Transport("extractor call timed out".into()));
        }
        if !status.success() && values.is_empty() {
            return Err(IngestError::Transport(format!(
                "{} exited with status {status} and produced no output",
                self.binary
            )));
        }
        Ok(values)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn validate_channel_url(&self, raw_url: &str) -> Result<String, IngestError> {
        validate_channel_url(raw_url)
    }

    async fn extract_channel_info(&self, channel_url: &str) -> Result<ChannelInfo, IngestError> {
        let values = self
            .run_json_lines(
                &[
                    "--quiet",
                    "--no-warnings",
                    "--dump-json",
                    "--flat-playlist",
                    "--playlist-items",
                    "1",
                    channel_url,
                ],
                Duration::from_secs(60),
            )
            .await?;
        let data = values
            .first()
            .ok_or_else(|| IngestError::NotFound(format!("no channel info for {channel_url}")))?;
        Ok(extract_channel_info_from_json(data, channel_url))
    }

    async fn enumerate_channel_videos(
        &self,
        channel_url: &str,
        max_videos: Option<u32>,
    ) -> Result<Vec<VideoMetadata>, IngestError> {
        let mut args = vec![
            "--quiet",
            "--no-warnings",
            "--dump-json",
            "--flat-playlist",
            "--ignore-errors",
        ];
        let range;
        if let Some(max) = max_videos {
            range = format!("1:{max}");
            args.push("--playlist-items");
            args.push(&range);
        }
        args.push(channel_url);
        let values = self.run_json_lines(&args, Duration::from_secs(300)).await?;
        let mut videos: Vec<VideoMetadata> = values
            .iter()
            .filter_map(|data| match extract_video_metadata(data, channel_url) {
                Ok(video) => Some(video),
                Err(err) => {
                    warn!(error = %err, "skipping video with unusable metadata");
                    None
                }
            })
            .collect();
        if let Some(max) = max_videos {
            videos.truncate(max as usize);
        }
        Ok(videos)
    }

    async fn get_video_details(&self, video_id: &str) -> Result<VideoMetadata, IngestError> {
        let video_url = format!("https://www.youtube.com/watch?v={video_id}");
        let values = self
            .run_json_lines(&["--dump-json", &video_url], Duration::from_secs(60))
            .await?;
        let data = values
            .first()
            .ok_or_else(|| IngestError::NotFound(format!("no video details for {video_id}")))?;
        extract_video_metadata(data, &video_url)
    }
}

/// Phase 0: URL validation/normalization, matching
/// `YouTubeChannelDiscovery.validate_channel_url`.
pub fn validate_channel_url(raw_url: &str) -> Result<String, IngestError> {
    let trimmed = raw_url.trim();
    let https_url = if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("https://{rest}")
    } else if trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = reqwest::Url::parse(&https_url)
        .map_err(|err| IngestError::Validation(format!("invalid channel URL: {err}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| IngestError::Validation("channel URL has no host".into()))?;
    if !["youtube.com", "www.youtube.com", "m.youtube.com"].contains(&host) {
        return Err(IngestError::Validation(format!(
            "unsupported channel host: {host}"
        )));
    }
    let path = parsed.path();
    let patterns = [
        r"^/channel/[A-Za-z0-9_-]{10,}$",
        r"^/c/[A-Za-z0-9_-]+$",
        r"^/user/[A-Za-z0-9_-]+$",
        r"^/@[A-Za-z0-9_.-]+$",
    ];
    let matches_any = patterns.iter().any(|pattern| {
        Regex::new(pattern)
            .map(|re| re.is_match(path))
            .unwrap_or(false)
    });
    if !matches_any {
        return Err(IngestError::Validation(format!(
            "channel URL path '{path}' does not match a known channel pattern"
        )));
    }
    let mut normalized = parsed.clone();
    let _ = normalized.set_host(Some("www.youtube.com"));
    Ok(normalized.to_string())
}

fn extract_required_field(data: &Value, field: &str) -> Result<String, IngestError> {
    let value = data
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| IngestError::Validation(format!("required field '{field}' is missing")))?;
    Ok(value.to_string())
}

fn safe_extract_string(data: &Value, fields: &[&str], max_length: usize) -> Option<String> {
    for field in fields {
        if let Some(value) = data.get(*field).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                let truncated: String = trimmed.chars().take(max_length).collect();
                return Some(truncated);
            }
        }
    }
    None
}

fn safe_extract_duration(data: &Value, field: &str) -> Option<i64> {
    match data.get(field)? {
        Value::Number(number) => {
            let seconds = number.as_f64()?.trunc() as i64;
            if (0..=MAX_DURATION_SECONDS).contains(&seconds) {
                Some(seconds)
            } else {
                None
            }
        }
        Value::String(text) => parse_duration_string(text),
        _ => None,
    }
}

fn parse_duration_string(text: &str) -> Option<i64> {
    let parts: Vec<&str> = text.split(':').collect();
    let seconds = match parts.as_slice() {
        [h, m, s] => {
            let h: i64 = h.parse().ok()?;
            let m: i64 = m.parse().ok()?;
            let s: i64 = s.parse().ok()?;
            h * 3600 + m * 60 + s
        }
        [m, s] => {
            let m: i64 = m.parse().ok()?;
            let s: i64 = s.parse().ok()?;
            m * 60 + s
        }
        [s] => s.parse().ok()?,
        _ => return None,
    };
    if (0..=MAX_DURATION_SECONDS).contains(&seconds) {
        Some(seconds)
    } else {
        None
    }
}

fn safe_extract_upload_date(data: &Value) -> Option<DateTime<Utc>> {
    for field in ["upload_date", "release_date", "timestamp"] {
        let value = data.get(field)?;
        if let Some(text) = value.as_str() {
            if text.len() == 8 && text.chars().all(|c| c.is_ascii_digit()) {
                let year: i32 = text[0..4].parse().ok()?;
                let month: u32 = text[4..6].parse().ok()?;
                let day: u32 = text[6..8].parse().ok()?;
                if let Some(naive) = chrono::NaiveDate::from_ymd_opt(year, month, day) {
                    return Some(Utc.from_utc_datetime(&naive.and_hms_opt(0, 0, 0)?));
                }
            }
            if text.contains('T') {
                let normalized = text.replace('Z', "+00:00");
                if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
                    return Some(parsed.with_timezone(&Utc));
                }
            }
        }
        if let Some(epoch) = value.as_f64() {
            if let Some(dt) = Utc.timestamp_opt(epoch.trunc() as i64, 0).single() {
                return Some(dt);
            }
        }
    }
    None
}

fn safe_extract_numeric(data: &Value, field: &str, min_value: i64, max_value: Option<i64>) -> Option<i64> {
    let raw = data.get(field)?;
    let parsed = match raw {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => {
            let cleaned: String = text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };
    let mut value = parsed.trunc() as i64;
    if value < min_value {
        return None;
    }
    if let Some(max_value) = max_value {
        value = value.min(max_value);
    }
    Some(value)
}

fn safe_extract_list(data: &Value, field: &str, max_items: usize) -> Vec<String> {
    data.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|item| item.trim().to_string())
                .take(max_items)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_best_thumbnail(data: &Value) -> Option<String> {
    let thumbnails = data.get("thumbnails")?.as_array()?;
    if thumbnails.is_empty() {
        return None;
    }
    let best = thumbnails
        .iter()
        .max_by_key(|thumb| {
            let width = thumb.get("width").and_then(Value::as_i64).unwrap_or(0);
            let height = thumb.get("height").and_then(Value::as_i64).unwrap_or(0);
            width.saturating_mul(height)
        })
        .or_else(|| thumbnails.last());
    best.and_then(|thumb| thumb.get("url")).and_then(Value::as_str).map(str::to_string)
}

fn extract_channel_identifier(data: &Value, channel_url: &str) -> Option<String> {
    for field in [
        "channel_id",
        "uploader_id",
        "playlist_channel_id",
        "channel_url",
        "uploader_url",
    ] {
        if let Some(value) = data.get(field).and_then(Value::as_str) {
            let trimmed = value.trim();
            if trimmed.starts_with("UC") || trimmed.starts_with('@') {
                return Some(trimmed.to_string());
            }
            if let Some(id) = extract_channel_id_from_url(trimmed) {
                return Some(id);
            }
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    extract_channel_id_from_url(channel_url)
}

fn extract_channel_id_from_url(candidate: &str) -> Option<String> {
    let re = Regex::new(r"/channel/([A-Za-z0-9_-]{10,})").ok()?;
    re.captures(candidate)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn safe_extract_boolean(data: &Value, fields: &[&str]) -> bool {
    for field in fields {
        match data.get(*field) {
            Some(Value::Bool(value)) => return *value,
            Some(Value::String(text)) => {
                let lower = text.to_lowercase();
                if ["true", "yes", "1", "live"].contains(&lower.as_str()) {
                    return true;
                }
            }
            Some(Value::Number(number)) => {
                if number.as_f64().map(|n| n != 0.0).unwrap_or(false) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn extract_age_restriction(data: &Value) -> bool {
    if let Some(age_limit) = data.get("age_limit").and_then(Value::as_i64) {
        if age_limit > 0 {
            return true;
        }
    }
    if safe_extract_boolean(data, &["is_age_restricted"]) {
        return true;
    }
    for field in ["content_warning", "content_rating"] {
        if let Some(text) = data.get(field).and_then(Value::as_str) {
            let lower = text.to_lowercase();
            if lower.contains("age") || lower.contains("mature") {
                return true;
            }
        }
    }
    false
}

/// Phase 1-9 extraction, matching `_extract_video_metadata`.
pub fn extract_video_metadata(data: &Value, channel_url: &str) -> Result<VideoMetadata, IngestError> {
    let video_id = extract_required_field(data, "id")?;
    if video_id.chars().count() != 11 {
        return Err(IngestError::Validation(format!(
            "video id '{video_id}' is not 11 characters"
        )));
    }
    let title = safe_extract_string(data, &["title"], GENERIC_STRING_CAP)
        .unwrap_or_else(|| "Untitled".to_string());
    let description = safe_extract_string(data, &["description"], DESCRIPTION_CAP);
    let duration = safe_extract_duration(data, "duration");
    let upload_date = safe_extract_upload_date(data);
    let view_count = safe_extract_numeric(data, "view_count", 0, None);
    let like_count = safe_extract_numeric(data, "like_count", 0, None);
    let comment_count = safe_extract_numeric(data, "comment_count", 0, None);
    let tags = safe_extract_list(data, "tags", TAGS_CAP);
    let categories = safe_extract_list(data, "categories", CATEGORIES_CAP);
    let thumbnail_url = extract_best_thumbnail(data);
    let channel_id = extract_channel_identifier(data, channel_url);
    let uploader = safe_extract_string(data, &["uploader", "channel", "uploader_id"], UPLOADER_CAP);
    let is_live = safe_extract_boolean(data, &["is_live"]);
    let age_restricted = extract_age_restriction(data);
    let video_url = format!("https://www.youtube.com/watch?v={video_id}");

    Ok(VideoMetadata {
        video_id,
        title,
        description,
        duration,
        upload_date,
        view_count,
        like_count,
        comment_count,
        tags,
        categories,
        thumbnail_url,
        video_url,
        channel_id,
        uploader,
        is_live,
        age_restricted,
    })
}

fn extract_channel_info_from_json(data: &Value, channel_url: &str) -> ChannelInfo {
    let channel_id = ["playlist_channel_id", "channel_id", "uploader_id", "playlist_uploader_id", "id"]
        .iter()
        .find_map(|field| data.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| derive_unknown_channel_id(data, channel_url));
    let title = ["playlist_channel", "channel", "uploader", "playlist_uploader"]
        .iter()
        .find_map(|field| data.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| "Unknown Channel".to_string());
    ChannelInfo {
        channel_id,
        channel_url: channel_url.to_string(),
        title,
        description: safe_extract_string(data, &["description"], DESCRIPTION_CAP),
        subscriber_count: safe_extract_numeric(data, "channel_follower_count", 0, None),
        video_count: safe_extract_numeric(data, "playlist_count", 0, None),
        playlist_id: data.get("playlist_id").and_then(Value::as_str).map(str::to_string),
    }
}

fn derive_unknown_channel_id(data: &Value, channel_url: &str) -> String {
    if let Some(handle) = Regex::new(r"/@([A-Za-z0-9_.-]+)")
        .ok()
        .and_then(|re| re.captures(channel_url))
        .and_then(|caps| caps.get(1))
    {
        return format!("@{}", handle.as_str());
    }
    let title_prefix: String = data
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("channel")
        .chars()
        .take(20)
        .collect();
    format!("UNKNOWN_{title_prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_channel_url_and_normalizes_host() {
        let normalized = validate_channel_url("m.youtube.com/@someone").expect("valid");
        assert!(normalized.starts_with("https://www.youtube.com/@someone"));
    }

    #[test]
    fn rejects_unknown_path_pattern() {
        assert!(validate_channel_url("https://www.youtube.com/playlist?list=x").is_err());
    }

    #[test]
    fn rejects_unknown_host() {
        assert!(validate_channel_url("https://vimeo.com/@someone").is_err());
    }

    #[test]
    fn duration_parses_hh_mm_ss() {
        let data = json!({ "id": "dQw4w9WgXcQ", "duration": "01:02:03" });
        let video = extract_video_metadata(&data, "https://www.youtube.com/@x").expect("ok");
        assert_eq!(video.duration, Some(3723));
    }

    #[test]
    fn duration_rejects_negative_and_too_large() {
        let data = json!({ "id": "dQw4w9WgXcQ", "duration": -5 });
        let video = extract_video_metadata(&data, "https://www.youtube.com/@x").expect("ok");
        assert_eq!(video.duration, None);

        let data = json!({ "id": "dQw4w9WgXcQ", "duration": 90000 });
        let video = extract_video_metadata(&data, "https://www.youtube.com/@x").expect("ok");
        assert_eq!(video.duration, None);
    }

    #[test]
    fn upload_date_parses_yyyymmdd() {
        let data = json!({ "id": "dQw4w9WgXcQ", "upload_date": "20230615" });
        let video = extract_video_metadata(&data, "https://www.youtube.com/@x").expect("ok");
        let date = video.upload_date.expect("parsed");
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2023-06-15");
    }

    #[test]
    fn view_count_parses_comma_separated_string() {
        let data = json!({ "id": "dQw4w9WgXcQ", "view_count": "1,234,567" });
        let video = extract_video_metadata(&data, "https://www.youtube.com/@x").expect("ok");
        assert_eq!(video.view_count, Some(1_234_567));
    }

    #[test]
    fn age_restriction_detected_from_age_limit() {
        let data = json!({ "id": "dQw4w9WgXcQ", "age_limit": 18 });
        let video = extract_video_metadata(&data, "https://www.youtube.com/@x").expect("ok");
        assert!(video.age_restricted);
    }

    #[test]
    fn channel_identifier_extracted_from_url_when_fields_absent() {
        let data = json!({ "id": "dQw4w9WgXcQ" });
        let video =
            extract_video_metadata(&data, "https://www.youtube.com/channel/UC1234567890").expect("ok");
        assert_eq!(video.channel_id.as_deref(), Some("UC1234567890"));
    }

    #[test]
    fn rejects_short_video_id() {
        let data = json!({ "id": "short" });
        assert!(extract_video_metadata(&data, "https://www.youtube.com/@x").is_err());
    }

    #[test]
    fn channel_info_falls_back_to_unknown_title() {
        let data = json!({ "id": "UC1234567890" });
        let info = extract_channel_info_from_json(&data, "https://www.youtube.com/@someone");
        assert_eq!(info.title, "Unknown Channel");
    }

    #[test]
    fn dedup_table_tracks_seen_and_loaded_ids() {
        let mut table = DedupTable::new();
        assert!(!table.is_duplicate("dQw4w9WgXcQ"));
        table.load_existing(vec![("dQw4w9WgXcQ".to_string(), Uuid::new_v4())]);
        assert!(table.is_duplicate("dQw4w9WgXcQ"));
        table.mark_processed("aaaaaaaaaaa", Uuid::new_v4());
        assert!(table.is_duplicate("aaaaaaaaaaa"));
        assert!(!table.is_duplicate("bbbbbbbbbbb"));
    }

    #[test]
    fn dedup_table_mark_processed_is_idempotent() {
        let mut table = DedupTable::new();
        let first = Uuid::new_v4();
        table.mark_processed("aaaaaaaaaaa", first);
        table.mark_processed("aaaaaaaaaaa", Uuid::new_v4());
        assert!(table.is_duplicate("aaaaaaaaaaa"));
    }
}
