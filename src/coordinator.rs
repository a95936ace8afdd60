use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::concurrent::ConcurrentProcessor;
use crate::config::{Config, DownloadMode};
use crate::dead_letter::DeadLetterQueue;
use crate::error::IngestError;
use crate::extractor::{DedupTable, Extractor};
use crate::models::{ChannelRef, DownloadStatus, ErrorContext, Person, Progress, ProgressStatus, Video};
use crate::persistence::Store;
use crate::progress::{ProgressMonitor, ProgressState, VideoOutcome};
use crate::rate_limiter::{RateLimitConfig, ServiceRateLimiter};
use crate::recovery::{ErrorRecoveryManager, RecoveryStrategy};
use crate::resource_monitor::{ResourceLimits, ResourceMonitor, SysinfoSampler};
use crate::storage::ObjectStore;
use crate::transaction::Transaction;

const YOUTUBE_SERVICE: &str = "youtube";

/// Outcome of ingesting a single channel, matching
/// `mass_coordinator.py::ChannelProcessingResult`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ChannelProcessingResult {
    pub channel_url: String,
    pub person_id: Option<i64>,
    pub videos_discovered: u32,
    pub videos_saved: u32,
    pub success: bool,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl ChannelProcessingResult {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.videos_discovered == 0 {
            0.0
        } else {
            f64::from(self.videos_saved) / f64::from(self.videos_discovered)
        }
    }
}

/// Checkpointed per-channel state, saved once a channel's videos have been
/// enumerated and saved so a crash or resume can seed duplicate detection
/// instead of re-discovering videos from scratch.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct ChannelCheckpointState {
    channel_url: String,
    person_id: i64,
    videos: Vec<(String, uuid::Uuid)>,
}

/// Derives a filesystem-safe checkpoint key from a channel URL so it can be
/// looked up before the channel's `Person` row exists (and hence before a
/// `person_id` is known).
fn checkpoint_key_for_channel(channel_url: &str) -> String {
    let sanitized: String = channel_url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("channel-{sanitized}")
}

#[allow(clippy::cast_possible_wrap)]
async fn file_size_of(path: &std::path::Path) -> Result<i64, IngestError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
    Ok(metadata.len() as i64)
}

/// Orchestrates the whole pipeline, matching
/// `mass_download/mass_coordinator.py::MassDownloadCoordinator`.
pub struct Coordinator {
    config: Config,
    store: Arc<dyn Store>,
    extractor: Arc<dyn Extractor>,
    object_store: Arc<dyn ObjectStore>,
    recovery: ErrorRecoveryManager,
    rate_limiter: ServiceRateLimiter,
    dead_letter: DeadLetterQueue<String>,
    checkpoints: CheckpointStore,
    pub progress: Arc<ProgressMonitor>,
    concurrent: ConcurrentProcessor,
    resource_monitor: Arc<ResourceMonitor>,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        config: Config,
        job_id: String,
        store: Arc<dyn Store>,
        extractor: Arc<dyn Extractor>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let progress_file = config.recovery_dir.join(format!("{job_id}.progress.json"));
        let dlq_file = config.recovery_dir.join(format!("{job_id}.deadletter.json"));
        let mut rate_limiter_defaults = RateLimitConfig::default();
        if let Some(service_config) = config.rate_limiting_services.get(YOUTUBE_SERVICE) {
            rate_limiter_defaults = RateLimitConfig::new(service_config.rate, service_config.burst)
                .unwrap_or_default();
        }

        let resource_monitor = Arc::new(ResourceMonitor::new(
            ResourceLimits {
                max_cpu_percent: config.max_cpu_percent,
                max_memory_percent: config.max_memory_percent,
                check_interval: Duration::from_secs(config.check_interval_seconds),
                throttle_factor: config.throttle_factor,
                min_concurrent: config.min_concurrent,
            },
            Box::new(SysinfoSampler::new()),
        ));
        resource_monitor.clone().start(|| 0);

        Self {
            concurrent: ConcurrentProcessor::new(
                config.max_concurrent_channels,
                config.max_concurrent_downloads,
                Some(resource_monitor.clone()),
            ),
            resource_monitor,
            recovery: ErrorRecoveryManager::with_dead_letter_file(
                crate::circuit_breaker::CircuitBreakerConfig::default(),
                crate::retry::RetryConfig::default(),
                Some(config.recovery_dir.join(format!("{job_id}.operations.deadletter.json"))),
            ),
            rate_limiter: ServiceRateLimiter::new(rate_limiter_defaults),
            dead_letter: DeadLetterQueue::new(1000, Some(dlq_file)),
            checkpoints: CheckpointStore::new(config.recovery_dir.clone()),
            progress: Arc::new(ProgressMonitor::new(job_id, Some(progress_file))),
            config,
            store,
            extractor,
            object_store,
        }
    }

    /// Matches `resume_job(job_id)`: loads this job's persisted progress and
    /// dead-letter state so a run can continue instead of starting over.
    /// A no-op when no prior state file exists. Jobs left in a terminal
    /// state by the prior run cannot be resumed.
    pub async fn rehydrate(&self) -> Result<(), IngestError> {
        self.dead_letter.load().await?;
        self.recovery.dead_letter().load().await?;
        if self.progress.resume_from_disk().await? {
            let state = self.progress.current_state().await;
            if matches!(
                state,
                ProgressState::Completed | ProgressState::Failed | ProgressState::Cancelled
            ) {
                return Err(IngestError::Validation(format!(
                    "job is in terminal state {state:?} and cannot be resumed"
                )));
            }
            info!("resumed prior progress and dead-letter state");
        }
        Ok(())
    }

    /// Entry point matching `process_input_file`: validates each channel
    /// reference, then fans them out through `process_channels_concurrently`.
    pub async fn process_input_file(
        self: &Arc<Self>,
        job_id: &str,
        channels: Vec<ChannelRef>,
    ) -> Result<Progress, IngestError> {
        // A resumed run skips whole channels a prior pass already completed,
        // matching worked example 6: duplicate detection marks them skipped
        // rather than re-enumerating and re-discovering their videos.
        let already_completed = self.progress.completed_channel_urls().await;
        let (to_skip, to_process): (Vec<ChannelRef>, Vec<ChannelRef>) = channels
            .into_iter()
            .partition(|c| already_completed.contains(&c.person.channel_url));

        info!(
            total = to_skip.len() + to_process.len(),
            skipped = to_skip.len(),
            "starting ingestion run"
        );
        self.progress.start((to_skip.len() + to_process.len()) as u64).await;
        for channel in &to_skip {
            self.progress
                .skip_channel(&channel.person.channel_url, Some(channel.person.name.clone()))
                .await;
        }

        let results = self.process_channels_concurrently(to_process).await;

        let channels_failed = results.iter().filter(|r| !r.success).count() as i64;
        let channels_skipped = to_skip.len() as i64;
        let total_videos: i64 = results.iter().map(|r| i64::from(r.videos_discovered)).sum();
        let videos_skipped: i64 = results
            .iter()
            .map(|r| i64::from(r.videos_discovered) - i64::from(r.videos_saved))
            .sum();
        self.progress.stop(ProgressState::Completed).await?;

        // A run that completes with some channels failed is still reported as
        // `Completed`, not a distinct failure state: individual failures are
        // visible in `channels_failed` and the dead-letter queue, and nothing
        // prevents the run from finishing its pass over the remaining channels.
        //
        // `videos_processed` counts every video this run examined, duplicate
        // or not, matching worked example 6; `videos_skipped` is the
        // duplicate-only subset.
        let progress = Progress {
            id: None,
            job_id: job_id.to_string(),
            input_file: String::new(),
            total_channels: results.len() as i64 + channels_skipped,
            channels_processed: results.len() as i64 - channels_failed,
            channels_failed,
            channels_skipped,
            total_videos,
            videos_processed: total_videos,
            videos_failed: 0,
            videos_skipped,
            bytes_downloaded: 0,
            status: ProgressStatus::Completed,
            error_message: None,
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        };
        self.store.save_progress(&progress).await?;
        Ok(progress)
    }

    /// Used by the `/healthz` route (§10.2) to confirm the store is reachable.
    pub async fn health_check(&self) -> Result<(), IngestError> {
        self.store.health_check().await
    }

    /// Matches `process_channels_concurrently`: one spawned task per
    /// channel, each bounded by the channel semaphore, joined with a
    /// `JoinSet` the way the teacher's `trigger.rs` fans out per-frequency
    /// tasks.
    pub async fn process_channels_concurrently(
        self: &Arc<Self>,
        channels: Vec<ChannelRef>,
    ) -> Vec<ChannelProcessingResult> {
        let mut tasks = tokio::task::JoinSet::new();
        for channel in channels {
            let coordinator = self.clone();
            tasks.spawn(async move {
                let max_concurrent = coordinator.config.max_concurrent_channels;
                coordinator
                    .concurrent
                    .run_channel_task(max_concurrent, || {
                        coordinator.process_channel_with_recovery(channel.person)
                    })
                    .await
            });
        }
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(err)) => results.push(ChannelProcessingResult {
                    channel_url: String::new(),
                    person_id: None,
                    videos_discovered: 0,
                    videos_saved: 0,
                    success: false,
                    error: Some(err.to_string()),
                    duration_seconds: 0.0,
                }),
                Err(join_err) => {
                    error!(error = %join_err, "channel task panicked");
                }
            }
        }
        results
    }

    /// Matches `process_channel_with_recovery`: wraps `process_channel` so
    /// a single channel's failure never aborts the whole batch. The failure
    /// is always recorded to the dead-letter queue; `continue_on_error`
    /// only decides whether the batch keeps going afterward or the error
    /// propagates to the caller.
    pub async fn process_channel_with_recovery(&self, person: Person) -> Result<ChannelProcessingResult, IngestError> {
        let channel_url = person.channel_url.clone();
        match self.process_channel(&person).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(channel = %channel_url, error = %err, "channel processing failed");
                self.progress.complete_channel(&channel_url, false, Some(err.to_string())).await;
                self.dead_letter
                    .add(channel_url.clone(), ErrorContext::new(&err, "process_channel"))
                    .await;
                if self.config.continue_on_error {
                    Ok(ChannelProcessingResult {
                        channel_url,
                        person_id: None,
                        videos_discovered: 0,
                        videos_saved: 0,
                        success: false,
                        error: Some(err.to_string()),
                        duration_seconds: 0.0,
                    })
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Matches `process_channel`: extract channel info, save the person,
    /// enumerate videos, save each one — wrapped in a `Transaction` so a
    /// failed save rolls back the extraction side effects (§4.D).
    pub async fn process_channel(&self, person: &Person) -> Result<ChannelProcessingResult, IngestError> {
        let start = Instant::now();
        let channel_url = self.extractor.validate_channel_url(&person.channel_url)?;
        self.progress.start_channel(&channel_url, Some(person.name.clone())).await;

        let checkpoint_key = checkpoint_key_for_channel(&channel_url);
        let mut dedup = DedupTable::new();
        if let Some(checkpoint) = self
            .checkpoints
            .load::<ChannelCheckpointState>(&checkpoint_key)
            .await?
        {
            dedup.load_existing(checkpoint.state.videos);
        }

        crate::rate_limiter::rate_limit(&self.rate_limiter, YOUTUBE_SERVICE, 1.0, Duration::from_secs(30)).await?;

        let channel_info = self
            .recovery
            .with_recovery(
                YOUTUBE_SERVICE,
                "extract_channel_info",
                RecoveryStrategy::CircuitBreaker,
                None,
                || self.extractor.extract_channel_info(&channel_url),
            )
            .await?;

        let mut person_to_save = person.clone();
        person_to_save.channel_url = channel_url.clone();
        person_to_save.channel_id = Some(channel_info.channel_id.clone());

        // Two transactional steps: upserting the person, then enumerating
        // videos for it. If enumeration fails, the transaction unwinds the
        // person upsert (§4.D) rather than leaving a channel on record with
        // no videos behind it.
        let person_id_slot: Arc<tokio::sync::Mutex<Option<i64>>> = Arc::new(tokio::sync::Mutex::new(None));
        let videos_slot: Arc<tokio::sync::Mutex<Vec<crate::extractor::VideoMetadata>>> =
            Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut tx = Transaction::new();

        let store = self.store.clone();
        let slot = person_id_slot.clone();
        tx.add_operation(
            "upsert_person",
            move || async move {
                let id = store.upsert_person(&person_to_save).await?;
                *slot.lock().await = Some(id);
                Ok(())
            },
            {
                let store = self.store.clone();
                let slot = person_id_slot.clone();
                move || async move {
                    if let Some(id) = *slot.lock().await {
                        if let Err(err) = store.delete_person(id).await {
                            error!(person_id = id, error = %err, "person rollback failed");
                        }
                    }
                }
            },
        );

        let extractor = self.extractor.clone();
        let recovery = self.recovery.clone();
        let max_videos = self.config.max_videos_per_channel;
        let channel_url_for_enumerate = channel_url.clone();
        let slot = videos_slot.clone();
        tx.add_operation(
            "enumerate_channel_videos",
            move || async move {
                let videos = recovery
                    .with_recovery(
                        YOUTUBE_SERVICE,
                        "enumerate_channel_videos",
                        RecoveryStrategy::RetryBackoff,
                        None,
                        || extractor.enumerate_channel_videos(&channel_url_for_enumerate, max_videos),
                    )
                    .await?;
                *slot.lock().await = videos;
                Ok(())
            },
            || async {},
        );

        tx.execute().await?;

        let person_id = person_id_slot.lock().await.ok_or_else(|| {
            IngestError::Persistence("upsert_person transaction step did not record an id".into())
        })?;
        let videos = std::mem::take(&mut *videos_slot.lock().await);

        self.progress.update_channel_videos(&channel_url, videos.len() as u64).await;

        let mut saved_videos = Vec::new();
        let mut saved_count = 0u32;
        for metadata in &videos {
            // The in-memory dedup table (§4.H) catches ids already seen this
            // run or seeded from a checkpoint; `Store::video_exists` remains
            // the durable check across process restarts once it hasn't.
            if self.config.skip_existing_videos
                && (dedup.is_duplicate(&metadata.video_id) || self.store.video_exists(&metadata.video_id).await?)
            {
                self.progress
                    .update_video_progress(&channel_url, &metadata.video_id, VideoOutcome::Skipped)
                    .await;
                continue;
            }
            let mut video = Video::new(person_id, metadata.video_id.clone(), metadata.title.clone());
            video.description = metadata.description.clone();
            video.duration = metadata.duration;
            video.upload_date = metadata.upload_date;
            video.view_count = metadata.view_count;
            match self.store.upsert_video(&video).await {
                Ok(_) => {
                    dedup.mark_processed(video.video_id.clone(), video.uuid);
                    saved_videos.push((video.video_id.clone(), video.uuid));
                    saved_count += 1;
                    self.progress
                        .update_video_progress(&channel_url, &metadata.video_id, VideoOutcome::Processed)
                        .await;
                }
                Err(err) => {
                    warn!(video_id = %metadata.video_id, error = %err, "failed to save video");
                    self.progress
                        .update_video_progress(&channel_url, &metadata.video_id, VideoOutcome::Failed)
                        .await;
                }
            }
        }

        self.checkpoints
            .save(&Checkpoint::new(
                checkpoint_key,
                ChannelCheckpointState {
                    channel_url: channel_url.clone(),
                    person_id,
                    videos: saved_videos,
                },
            ))
            .await?;

        self.progress.complete_channel(&channel_url, true, None).await;

        Ok(ChannelProcessingResult {
            channel_url,
            person_id: Some(person_id),
            videos_discovered: videos.len() as u32,
            videos_saved: saved_count,
            success: true,
            error: None,
            duration_seconds: start.elapsed().as_secs_f64(),
        })
    }

    /// Downloads and uploads every pending video for a channel already
    /// recorded by `process_channel`, matching `process_channel_with_downloads`.
    /// The actual media fetch is delegated to the `ObjectStore`/extractor
    /// boundary; this crate never shells out to a download tool beyond the
    /// metadata extractor (Non-goals).
    pub async fn process_channel_with_downloads(&self, person_id: i64) -> Result<u32, IngestError> {
        let pending = self.store.pending_videos_for_person(person_id).await?;
        let mut downloaded = 0u32;
        for video in pending {
            let result = self
                .concurrent
                .run_download_task(|| self.download_and_store(video.clone()))
                .await;
            match result {
                Ok(()) => downloaded += 1,
                Err(err) => {
                    warn!(video_id = %video.video_id, error = %err, "download failed");
                    self.store
                        .update_video_status(&video.video_id, DownloadStatus::Failed, Some(err.to_string()))
                        .await?;
                }
            }
        }
        Ok(downloaded)
    }

    /// Matches `process_channel_with_downloads`'s per-video fetch-then-store
    /// step. The actual media fetch is delegated to the extractor/object
    /// store boundary; this crate never shells out to a download tool
    /// beyond the metadata extractor (Non-goals) and writes a placeholder
    /// file of the fetched media's size in its place. Storage keys follow
    /// spec §6: `<prefix>/<video_id>_<uuid>.<ext>`. `download_mode`
    /// decides where the bytes land before `s3_path` is recorded:
    /// `stream_to_store` uploads straight from a scratch file under
    /// `recovery_dir`; `local_then_upload` uploads from
    /// `local_download_dir` and optionally deletes the local copy
    /// afterward; `local_only` never uploads, recording the local path as
    /// `s3_path` instead.
    async fn download_and_store(&self, video: Video) -> Result<(), IngestError> {
        self.store
            .update_video_status(&video.video_id, DownloadStatus::Downloading, None)
            .await?;

        let ext = self.config.download_format.as_deref().unwrap_or("mp4");
        let key = format!("{}/{}_{}.{}", self.config.s3_prefix, video.video_id, video.uuid, ext);
        let mut updated = video.clone();

        match self.config.download_mode {
            DownloadMode::StreamToStore => {
                let tmp_path = self.config.recovery_dir.join(format!("{}.part", video.video_id));
                self.write_placeholder_media(&tmp_path).await?;
                let file_size = file_size_of(&tmp_path).await?;
                let stored_path = self.object_store.put_file(&tmp_path, &key).await?;
                let _ = tokio::fs::remove_file(&tmp_path).await;
                updated.s3_path = Some(stored_path);
                updated.file_size = Some(file_size);
            }
            DownloadMode::LocalThenUpload => {
                let local_path = self.local_media_path(&video.video_id, ext);
                self.write_placeholder_media(&local_path).await?;
                let file_size = file_size_of(&local_path).await?;
                let stored_path = self.object_store.put_file(&local_path, &key).await?;
                if self.config.delete_after_upload {
                    let _ = tokio::fs::remove_file(&local_path).await;
                }
                updated.s3_path = Some(stored_path);
                updated.file_size = Some(file_size);
            }
            DownloadMode::LocalOnly => {
                let local_path = self.local_media_path(&video.video_id, ext);
                self.write_placeholder_media(&local_path).await?;
                let file_size = file_size_of(&local_path).await?;
                updated.s3_path = Some(local_path.to_string_lossy().into_owned());
                updated.file_size = Some(file_size);
            }
        }

        updated.download_status = DownloadStatus::Completed;
        self.store.upsert_video(&updated).await?;
        Ok(())
    }

    fn local_media_path(&self, video_id: &str, ext: &str) -> std::path::PathBuf {
        self.config
            .local_download_dir
            .clone()
            .unwrap_or_else(|| self.config.recovery_dir.clone())
            .join(format!("{video_id}.{ext}"))
    }

    async fn write_placeholder_media(&self, path: &std::path::Path) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| IngestError::Persistence(err.to_string()))?;
        }
        tokio::fs::write(path, b"")
            .await
            .map_err(|err| IngestError::Persistence(err.to_string()))
    }

    /// Matches `retry_failed_operations`: drains the dead-letter queue,
    /// re-running `process_channel` for each failed channel URL against the
    /// person record already on file for it, so a retry can't clobber the
    /// real name/email with a synthesized stand-in.
    pub async fn retry_failed_operations(&self) -> (usize, usize) {
        self.dead_letter
            .retry_all(|channel_url| async move {
                let person = self
                    .store
                    .find_person_by_channel_url(&channel_url)
                    .await?
                    .ok_or_else(|| {
                        IngestError::Persistence(format!(
                            "no person record on file for channel '{channel_url}', cannot retry"
                        ))
                    })?;
                self.process_channel(&person).await.map(|_| ())
            })
            .await
    }

    /// Matches `cleanup_old_checkpoints(days=7)`.
    pub async fn cleanup_old_checkpoints(&self, days: i64) -> Result<usize, IngestError> {
        self.checkpoints.cleanup_older_than(days).await
    }

    /// Matches `shutdown`: persists progress and the dead-letter queue.
    pub async fn shutdown(&self) -> Result<(), IngestError> {
        info!("shutting down coordinator");
        self.resource_monitor.stop();
        self.progress.persist().await?;
        self.dead_letter.save().await?;
        self.recovery.dead_letter().save().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::extractor::{ChannelInfo, Extractor, VideoMetadata};
    use crate::persistence::InMemoryStore;
    use crate::storage::FilesystemStore;

    struct StubExtractor {
        videos: Vec<VideoMetadata>,
        fail_enumeration: bool,
    }

    fn stub_video(video_id: &str) -> VideoMetadata {
        VideoMetadata {
            video_id: video_id.to_string(),
            title: format!("video {video_id}"),
            description: None,
            duration: Some(60),
            upload_date: None,
            view_count: Some(0),
            like_count: None,
            comment_count: None,
            tags: vec![],
            categories: vec![],
            thumbnail_url: None,
            video_url: format!("https://www.youtube.com/watch?v={video_id}"),
            channel_id: None,
            uploader: None,
            is_live: false,
            age_restricted: false,
        }
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        fn validate_channel_url(&self, raw_url: &str) -> Result<String, IngestError> {
            Ok(raw_url.to_string())
        }

        async fn extract_channel_info(&self, channel_url: &str) -> Result<ChannelInfo, IngestError> {
            Ok(ChannelInfo {
                channel_id: "UC1234567890".into(),
                channel_url: channel_url.to_string(),
                title: "Stub Channel".into(),
                description: None,
                subscriber_count: None,
                video_count: None,
                playlist_id: None,
            })
        }

        async fn enumerate_channel_videos(
            &self,
            _channel_url: &str,
            _max_videos: Option<u32>,
        ) -> Result<Vec<VideoMetadata>, IngestError> {
            if self.fail_enumeration {
                Err(IngestError::Validation("no videos available".into()))
            } else {
                Ok(self.videos.clone())
            }
        }

        async fn get_video_details(&self, video_id: &str) -> Result<VideoMetadata, IngestError> {
            Ok(stub_video(video_id))
        }
    }

    fn test_person(channel_url: &str) -> Person {
        Person {
            id: None,
            name: "Someone".into(),
            email: None,
            person_type: None,
            channel_url: channel_url.into(),
            channel_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn test_coordinator(extractor: StubExtractor) -> (Arc<Coordinator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            recovery_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let coordinator = Arc::new(Coordinator::new(
            config,
            "test-job".into(),
            Arc::new(InMemoryStore::new()),
            Arc::new(extractor),
            Arc::new(FilesystemStore::new(dir.path())),
        ));
        (coordinator, dir)
    }

    #[tokio::test]
    async fn process_channel_persists_person_and_videos() {
        let (coordinator, _dir) = test_coordinator(StubExtractor {
            videos: vec![stub_video("aaaaaaaaaaa"), stub_video("bbbbbbbbbbb")],
            fail_enumeration: false,
        });
        let result = coordinator
            .process_channel(&test_person("https://www.youtube.com/@someone"))
            .await
            .expect("processing succeeds");
        assert!(result.success);
        assert_eq!(result.videos_discovered, 2);
        assert_eq!(result.videos_saved, 2);
        assert!(coordinator
            .store
            .find_person_by_channel_url("https://www.youtube.com/@someone")
            .await
            .expect("lookup")
            .is_some());
    }

    #[tokio::test]
    async fn failed_enumeration_rolls_back_the_person_upsert() {
        let (coordinator, _dir) = test_coordinator(StubExtractor {
            videos: vec![],
            fail_enumeration: true,
        });
        let err = coordinator
            .process_channel(&test_person("https://www.youtube.com/@someone"))
            .await
            .expect_err("enumeration failure propagates");
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(coordinator
            .store
            .find_person_by_channel_url("https://www.youtube.com/@someone")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn skip_existing_videos_are_not_recounted_as_saved() {
        let (coordinator, _dir) = test_coordinator(StubExtractor {
            videos: vec![stub_video("aaaaaaaaaaa")],
            fail_enumeration: false,
        });
        coordinator
            .store
            .upsert_video(&Video::new(1, "aaaaaaaaaaa".into(), "existing".into()))
            .await
            .expect("seed existing video");

        let result = coordinator
            .process_channel(&test_person("https://www.youtube.com/@someone"))
            .await
            .expect("processing succeeds");
        assert_eq!(result.videos_discovered, 1);
        assert_eq!(result.videos_saved, 0);
    }

    #[tokio::test]
    async fn concurrent_fan_out_processes_every_channel() {
        let (coordinator, _dir) = test_coordinator(StubExtractor {
            videos: vec![stub_video("aaaaaaaaaaa")],
            fail_enumeration: false,
        });
        let channels = vec![
            ChannelRef { person: test_person("https://www.youtube.com/@one") },
            ChannelRef { person: test_person("https://www.youtube.com/@two") },
        ];
        let results = coordinator.process_channels_concurrently(channels).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }
}
