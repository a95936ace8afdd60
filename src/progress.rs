use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::IngestError;

/// Mirrors `progress_monitor.py::ProgressState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    NotStarted,
    Initializing,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of handling one discovered video, recorded through
/// `ProgressMonitor::update_video_progress`. `Processed` covers metadata
/// persisted without a media download (the common case while
/// `download_videos` is off); only `Downloaded` counts toward
/// `ProgressMetrics::videos_downloaded`, matching spec §3's distinct
/// meaning for that counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoOutcome {
    Processed,
    Downloaded,
    Failed,
    Skipped,
}

/// Mirrors `progress_monitor.py::ChannelProgress`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelProgress {
    pub channel_url: String,
    pub channel_name: Option<String>,
    pub total_videos: u64,
    pub videos_processed: u64,
    pub videos_failed: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
}

/// Mirrors `progress_monitor.py::ProgressMetrics`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressMetrics {
    pub total_channels: u64,
    pub channels_processed: u64,
    pub channels_failed: u64,
    pub channels_skipped: u64,
    pub total_videos: u64,
    pub videos_downloaded: u64,
    pub videos_failed: u64,
    pub videos_skipped: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub bytes_downloaded: u64,
    pub average_speed_mbps: f64,
    pub current_channel: Option<String>,
    pub current_video: Option<String>,
    pub current_operation: Option<String>,
}

impl Default for ProgressMetrics {
    fn default() -> Self {
        Self {
            total_channels: 0,
            channels_processed: 0,
            channels_failed: 0,
            channels_skipped: 0,
            total_videos: 0,
            videos_downloaded: 0,
            videos_failed: 0,
            videos_skipped: 0,
            start_time: None,
            end_time: None,
            bytes_downloaded: 0,
            average_speed_mbps: 0.0,
            current_channel: None,
            current_video: None,
            current_operation: None,
        }
    }
}

impl ProgressMetrics {
    #[must_use]
    pub fn elapsed_time(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            (Some(start), None) => (Utc::now() - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// `None` until at least one channel has completed, matching
    /// `ProgressMetrics.get_eta`.
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        if self.channels_processed == 0 || self.total_channels == 0 {
            return None;
        }
        let elapsed = self.elapsed_time().as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let rate = self.channels_processed as f64 / elapsed;
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total_channels.saturating_sub(self.channels_processed) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }

    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.total_channels == 0 {
            return 0.0;
        }
        (self.channels_processed as f64 / self.total_channels as f64) * 100.0
    }
}

struct ProgressInner {
    state: ProgressState,
    metrics: ProgressMetrics,
    channels: HashMap<String, ChannelProgress>,
}

/// Tracks live ingestion progress and periodically persists a snapshot,
/// matching `progress_monitor.py::ProgressMonitor`.
pub struct ProgressMonitor {
    job_id: String,
    progress_file: Option<PathBuf>,
    inner: RwLock<ProgressInner>,
}

impl ProgressMonitor {
    #[must_use]
    pub fn new(job_id: impl Into<String>, progress_file: Option<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            progress_file,
            inner: RwLock::new(ProgressInner {
                state: ProgressState::NotStarted,
                metrics: ProgressMetrics::default(),
                channels: HashMap::new(),
            }),
        }
    }

    pub async fn start(&self, total_channels: u64) {
        let mut inner = self.inner.write().await;
        inner.state = ProgressState::Initializing;
        inner.metrics.total_channels = total_channels;
        inner.metrics.start_time = Some(Utc::now());
        inner.state = ProgressState::Processing;
    }

    pub async fn pause(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == ProgressState::Processing {
            inner.state = ProgressState::Paused;
        }
    }

    pub async fn resume(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == ProgressState::Paused {
            inner.state = ProgressState::Processing;
        }
    }

    pub async fn stop(&self, final_state: ProgressState) -> Result<(), IngestError> {
        let mut inner = self.inner.write().await;
        inner.state = final_state;
        inner.metrics.end_time = Some(Utc::now());
        drop(inner);
        self.save_progress().await
    }

    pub async fn start_channel(&self, channel_url: &str, channel_name: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.channels.insert(
            channel_url.to_string(),
            ChannelProgress {
                channel_url: channel_url.to_string(),
                channel_name: channel_name.clone(),
                total_videos: 0,
                videos_processed: 0,
                videos_failed: 0,
                start_time: Some(Utc::now()),
                end_time: None,
                status: "processing".to_string(),
                error_message: None,
            },
        );
        inner.metrics.current_channel = Some(channel_url.to_string());
        inner.metrics.current_operation = Some("discovering videos".to_string());
    }

    pub async fn update_channel_videos(&self, channel_url: &str, total_videos: u64) {
        let mut inner = self.inner.write().await;
        if let Some(channel) = inner.channels.get_mut(channel_url) {
            channel.total_videos = total_videos;
        }
    }

    /// Records a whole channel as skipped rather than processed, used when
    /// resuming a job finds the channel already completed in a prior run.
    pub async fn skip_channel(&self, channel_url: &str, channel_name: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.channels.insert(
            channel_url.to_string(),
            ChannelProgress {
                channel_url: channel_url.to_string(),
                channel_name,
                total_videos: 0,
                videos_processed: 0,
                videos_failed: 0,
                start_time: Some(Utc::now()),
                end_time: Some(Utc::now()),
                status: "skipped".to_string(),
                error_message: None,
            },
        );
        inner.metrics.channels_skipped = inner.metrics.channels_skipped.saturating_add(1);
    }

    pub async fn complete_channel(&self, channel_url: &str, success: bool, error_message: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(channel) = inner.channels.get_mut(channel_url) {
            channel.end_time = Some(Utc::now());
            channel.status = if success { "completed".to_string() } else { "failed".to_string() };
            channel.error_message = error_message;
        }
        if success {
            inner.metrics.channels_processed = inner.metrics.channels_processed.saturating_add(1);
        } else {
            inner.metrics.channels_failed = inner.metrics.channels_failed.saturating_add(1);
        }
        if inner.metrics.current_channel.as_deref() == Some(channel_url) {
            inner.metrics.current_channel = None;
        }
    }

    pub async fn update_video_progress(&self, channel_url: &str, video_id: &str, outcome: VideoOutcome) {
        let mut inner = self.inner.write().await;
        inner.metrics.current_video = Some(video_id.to_string());
        match outcome {
            VideoOutcome::Downloaded => {
                inner.metrics.videos_downloaded = inner.metrics.videos_downloaded.saturating_add(1);
            }
            VideoOutcome::Failed => {
                inner.metrics.videos_failed = inner.metrics.videos_failed.saturating_add(1);
            }
            VideoOutcome::Skipped => {
                inner.metrics.videos_skipped = inner.metrics.videos_skipped.saturating_add(1);
            }
            VideoOutcome::Processed => {}
        }
        if let Some(channel) = inner.channels.get_mut(channel_url) {
            if matches!(outcome, VideoOutcome::Processed | VideoOutcome::Downloaded | VideoOutcome::Failed) {
                channel.videos_processed = channel.videos_processed.saturating_add(1);
            }
            if outcome == VideoOutcome::Failed {
                channel.videos_failed = channel.videos_failed.saturating_add(1);
            }
        }
    }

    pub async fn update_download_stats(&self, bytes: u64, elapsed: Duration) {
        let mut inner = self.inner.write().await;
        inner.metrics.bytes_downloaded = inner.metrics.bytes_downloaded.saturating_add(bytes);
        if elapsed.as_secs_f64() > 0.0 {
            let mbps = (bytes as f64 * 8.0 / 1_000_000.0) / elapsed.as_secs_f64();
            inner.metrics.average_speed_mbps = mbps;
        }
    }

    pub async fn current_metrics(&self) -> ProgressMetrics {
        self.inner.read().await.metrics.clone()
    }

    pub async fn current_state(&self) -> ProgressState {
        self.inner.read().await.state
    }

    /// The structured report shape from §10.8.
    pub async fn summary_report(&self) -> SummaryReport {
        let inner = self.inner.read().await;
        SummaryReport {
            state: inner.state,
            overall_progress: OverallProgress {
                percent: inner.metrics.progress_percent(),
                channels_total: inner.metrics.total_channels,
                channels_processed: inner.metrics.channels_processed,
                channels_failed: inner.metrics.channels_failed,
                channels_skipped: inner.metrics.channels_skipped,
                videos_downloaded: inner.metrics.videos_downloaded,
                videos_failed: inner.metrics.videos_failed,
                videos_skipped: inner.metrics.videos_skipped,
            },
            performance: Performance {
                elapsed_seconds: inner.metrics.elapsed_time().as_secs_f64(),
                eta_seconds: inner.metrics.eta().map(|d| d.as_secs_f64()),
                average_speed_mbps: inner.metrics.average_speed_mbps,
                total_downloaded_gb: inner.metrics.bytes_downloaded as f64 / 1_073_741_824.0,
            },
            current_operation: CurrentOperation {
                channel: inner.metrics.current_channel.clone(),
                video: inner.metrics.current_video.clone(),
                operation: inner.metrics.current_operation.clone(),
            },
            channels: inner.channels.values().cloned().collect(),
        }
    }

    async fn save_progress(&self) -> Result<(), IngestError> {
        let Some(path) = &self.progress_file else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        write_atomically(path, &json).await
    }

    async fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.read().await;
        ProgressSnapshot {
            job_id: self.job_id.clone(),
            timestamp: Utc::now(),
            state: inner.state,
            metrics: inner.metrics.clone(),
            channel_progress: inner.channels.clone(),
        }
    }

    pub async fn persist(&self) -> Result<(), IngestError> {
        self.save_progress().await
    }

    pub async fn load(progress_file: &Path) -> Result<ProgressSnapshot, IngestError> {
        let contents = tokio::fs::read_to_string(progress_file)
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))?;
        serde_json::from_str(&contents).map_err(|err| IngestError::Persistence(err.to_string()))
    }

    /// Rehydrates this monitor's live state from a previously persisted
    /// snapshot, used on `--resume` to restore counters and per-channel
    /// status before a run continues.
    pub async fn restore(&self, snapshot: ProgressSnapshot) {
        let mut inner = self.inner.write().await;
        inner.state = snapshot.state;
        inner.metrics = snapshot.metrics;
        inner.channels = snapshot.channel_progress;
    }

    /// Loads this monitor's own progress file, if one exists, and restores
    /// from it. Returns `true` when a snapshot was found and applied.
    pub async fn resume_from_disk(&self) -> Result<bool, IngestError> {
        let Some(path) = &self.progress_file else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }
        let snapshot = Self::load(path).await?;
        self.restore(snapshot).await;
        Ok(true)
    }

    /// Channel URLs whose prior run left them `completed`, used to skip
    /// re-processing them on resume.
    pub async fn completed_channel_urls(&self) -> std::collections::HashSet<String> {
        self.inner
            .read()
            .await
            .channels
            .values()
            .filter(|c| c.status == "completed")
            .map(|c| c.channel_url.clone())
            .collect()
    }

    /// Spawns the periodic persistence loop, matching `_persist_loop`.
    pub fn spawn_persist_loop(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if self.current_state().await == ProgressState::Completed {
                    break;
                }
                let _ = self.save_progress().await;
            }
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: ProgressState,
    pub metrics: ProgressMetrics,
    pub channel_progress: HashMap<String, ChannelProgress>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OverallProgress {
    pub percent: f64,
    pub channels_total: u64,
    pub channels_processed: u64,
    pub channels_failed: u64,
    pub channels_skipped: u64,
    pub videos_downloaded: u64,
    pub videos_failed: u64,
    pub videos_skipped: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Performance {
    pub elapsed_seconds: f64,
    pub eta_seconds: Option<f64>,
    pub average_speed_mbps: f64,
    pub total_downloaded_gb: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CurrentOperation {
    pub channel: Option<String>,
    pub video: Option<String>,
    pub operation: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SummaryReport {
    pub state: ProgressState,
    pub overall_progress: OverallProgress,
    pub performance: Performance,
    pub current_operation: CurrentOperation,
    pub channels: Vec<ChannelProgress>,
}

/// Renders the text report (`mass_download_report_<job_id>.txt`), matching
/// `progress_monitor.py::ProgressReporter`.
pub fn render_text_report(job_id: &str, report: &SummaryReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Mass Download Report — job {job_id}\n"));
    out.push_str(&format!("State: {:?}\n", report.state));
    out.push_str(&format!(
        "Channels: {}/{} processed, {} failed, {} skipped ({:.1}%)\n",
        report.overall_progress.channels_processed,
        report.overall_progress.channels_total,
        report.overall_progress.channels_failed,
        report.overall_progress.channels_skipped,
        report.overall_progress.percent,
    ));
    out.push_str(&format!(
        "Videos: {} downloaded, {} failed, {} skipped\n",
        report.overall_progress.videos_downloaded,
        report.overall_progress.videos_failed,
        report.overall_progress.videos_skipped,
    ));
    out.push_str(&format!(
        "Elapsed: {:.0}s, ETA: {}\n",
        report.performance.elapsed_seconds,
        report
            .performance
            .eta_seconds
            .map_or("unknown".to_string(), |s| format!("{s:.0}s")),
    ));
    out.push_str(&format!(
        "Throughput: {:.2} Mbps, {:.3} GB total\n\n",
        report.performance.average_speed_mbps, report.performance.total_downloaded_gb,
    ));
    for channel in &report.channels {
        out.push_str(&format!(
            "- {} [{}]: {}/{} videos, {} failed{}\n",
            channel.channel_name.clone().unwrap_or_else(|| channel.channel_url.clone()),
            channel.status,
            channel.videos_processed,
            channel.total_videos,
            channel.videos_failed,
            channel
                .error_message
                .as_ref()
                .map(|m| format!(" — {m}"))
                .unwrap_or_default(),
        ));
    }
    out
}

pub async fn save_text_report(path: &Path, contents: &str) -> Result<(), IngestError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))
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

    #[tokio::test]
    async fn eta_is_none_before_any_channel_completes() {
        let monitor = ProgressMonitor::new("job-1", None);
        monitor.start(10).await;
        let metrics = monitor.current_metrics().await;
        assert!(metrics.eta().is_none());
    }

    #[tokio::test]
    async fn channel_completion_updates_counters() {
        let monitor = ProgressMonitor::new("job-1", None);
        monitor.start(2).await;
        monitor.start_channel("https://www.youtube.com/@a", Some("A".into())).await;
        monitor.complete_channel("https://www.youtube.com/@a", true, None).await;
        let metrics = monitor.current_metrics().await;
        assert_eq!(metrics.channels_processed, 1);
        assert!(metrics.current_channel.is_none());
    }

    #[tokio::test]
    async fn persists_snapshot_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let monitor = ProgressMonitor::new("job-1", Some(path.clone()));
        monitor.start(1).await;
        monitor.persist().await.expect("persist succeeds");
        let loaded = ProgressMonitor::load(&path).await.expect("load succeeds");
        assert_eq!(loaded.job_id, "job-1");
    }

    #[tokio::test]
    async fn resume_from_disk_restores_counters_and_channel_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let monitor = ProgressMonitor::new("job-1", Some(path.clone()));
        monitor.start(2).await;
        monitor.start_channel("https://www.youtube.com/@a", Some("A".into())).await;
        monitor.complete_channel("https://www.youtube.com/@a", true, None).await;
        monitor.persist().await.expect("persist succeeds");

        let resumed = ProgressMonitor::new("job-1", Some(path));
        let restored = resumed.resume_from_disk().await.expect("resume succeeds");
        assert!(restored);
        let metrics = resumed.current_metrics().await;
        assert_eq!(metrics.channels_processed, 1);
        let completed = resumed.completed_channel_urls().await;
        assert!(completed.contains("https://www.youtube.com/@a"));
    }

    #[tokio::test]
    async fn skip_channel_increments_channels_skipped() {
        let monitor = ProgressMonitor::new("job-1", None);
        monitor.start(1).await;
        monitor.skip_channel("https://www.youtube.com/@a", None).await;
        let metrics = monitor.current_metrics().await;
        assert_eq!(metrics.channels_skipped, 1);
    }

    #[test]
    fn text_report_includes_channel_lines() {
        let report = SummaryReport {
            state: ProgressState::Processing,
            overall_progress: OverallProgress {
                percent: 50.0,
                channels_total: 2,
                channels_processed: 1,
                channels_failed: 0,
                channels_skipped: 0,
                videos_downloaded: 3,
                videos_failed: 0,
                videos_skipped: 1,
            },
            performance: Performance {
                elapsed_seconds: 12.0,
                eta_seconds: Some(12.0),
                average_speed_mbps: 1.5,
                total_downloaded_gb: 0.01,
            },
            current_operation: CurrentOperation {
                channel: None,
                video: None,
                operation: None,
            },
            channels: vec![ChannelProgress {
                channel_url: "https://www.youtube.com/@a".into(),
                channel_name: Some("A".into()),
                total_videos: 3,
                videos_processed: 3,
                videos_failed: 0,
                start_time: None,
                end_time: None,
                status: "completed".into(),
                error_message: None,
            }],
        };
        let text = render_text_report("job-1", &report);
        assert!(text.contains("job-1"));
        assert!(text.contains("A [completed]"));
    }
}
