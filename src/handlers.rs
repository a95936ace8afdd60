use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::coordinator::Coordinator;
use crate::extractor::YtDlpExtractor;
use crate::models::Person;
use crate::progress::SummaryReport;

/// Shared state for the control-plane HTTP routes, matching the teacher's
/// `HTTPHandlerState` (a handle to the job-submission channel plus the db
/// pool) — here widened to the coordinator plus the extractor used for the
/// health probe.
#[derive(Clone)]
pub struct HandlerState {
    pub coordinator: Arc<Coordinator>,
    pub extractor: Arc<YtDlpExtractor>,
    pub in_flight: Arc<Mutex<usize>>,
}

#[derive(Deserialize)]
pub struct IngestRequest {
    pub channel_url: String,
    pub person_name: Option<String>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub channel_url: String,
    pub accepted: bool,
}

/// `POST /channels/ingest` — submits one channel for processing, matching
/// the teacher's `post_channels_follow` handler shape.
pub async fn post_channels_ingest(
    State(state): State<HandlerState>,
    Json(request): Json<IngestRequest>,
) -> (StatusCode, Json<IngestResponse>) {
    let person = Person {
        id: None,
        name: request.person_name.unwrap_or_else(|| request.channel_url.clone()),
        email: None,
        person_type: None,
        channel_url: request.channel_url.clone(),
        channel_id: None,
        created_at: None,
        updated_at: None,
    };

    {
        let mut in_flight = state.in_flight.lock().await;
        *in_flight += 1;
    }

    let coordinator = state.coordinator.clone();
    let in_flight = state.in_flight.clone();
    let channel_url = request.channel_url.clone();
    tokio::spawn(async move {
        match coordinator.process_channel_with_recovery(person).await {
            Ok(result) => info!(channel = %channel_url, success = result.success, "ingest task finished"),
            Err(err) => tracing::error!(channel = %channel_url, error = %err, "ingest task errored"),
        }
        let mut in_flight = in_flight.lock().await;
        *in_flight = in_flight.saturating_sub(1);
    });

    (
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            channel_url: request.channel_url,
            accepted: true,
        }),
    )
}

/// `GET /status` — the structured progress summary from §10.8.
pub async fn get_status(State(state): State<HandlerState>) -> Json<SummaryReport> {
    Json(state.coordinator.progress.summary_report().await)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub extractor_available: bool,
    pub db_reachable: bool,
    pub in_flight_jobs: usize,
}

/// `GET /healthz`, matching §10.2's health check: extractor availability
/// plus a trivial store round-trip.
pub async fn get_healthz(State(state): State<HandlerState>) -> (StatusCode, Json<HealthResponse>) {
    let extractor_available = state.extractor.check_available().await.is_ok();
    let db_reachable = state.coordinator.health_check().await.is_ok();
    let in_flight_jobs = *state.in_flight.lock().await;
    let status = if extractor_available && db_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            extractor_available,
            db_reachable,
            in_flight_jobs,
        }),
    )
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub successful: usize,
    pub failed: usize,
}

/// `POST /dead-letters/retry` — drains and retries failed channel ingests.
pub async fn post_retry_dead_letters(State(state): State<HandlerState>) -> Json<RetryResponse> {
    let (successful, failed) = state.coordinator.retry_failed_operations().await;
    Json(RetryResponse { successful, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extractor::{ChannelInfo, VideoMetadata};
    use crate::persistence::InMemoryStore;
    use crate::storage::FilesystemStore;
    use async_trait::async_trait;

    struct StubExtractor;

    #[async_trait]
    impl crate::extractor::Extractor for StubExtractor {
        fn validate_channel_url(&self, raw_url: &str) -> Result<String, crate::error::IngestError> {
            Ok(raw_url.to_string())
        }

        async fn extract_channel_info(&self, channel_url: &str) -> Result<ChannelInfo, crate::error::IngestError> {
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
        ) -> Result<Vec<VideoMetadata>, crate::error::IngestError> {
            Ok(vec![])
        }

        async fn get_video_details(&self, video_id: &str) -> Result<VideoMetadata, crate::error::IngestError> {
            Ok(VideoMetadata {
                video_id: video_id.to_string(),
                title: "Stub video".into(),
                description: None,
                duration: None,
                upload_date: None,
                view_count: None,
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
            })
        }
    }

    fn test_state() -> HandlerState {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            recovery_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let coordinator = Arc::new(Coordinator::new(
            config,
            "test-job".into(),
            Arc::new(InMemoryStore::new()),
            Arc::new(StubExtractor),
            Arc::new(FilesystemStore::new(dir.path())),
        ));
        HandlerState {
            coordinator,
            extractor: Arc::new(YtDlpExtractor::new("true")),
            in_flight: Arc::new(Mutex::new(0)),
        }
    }

    #[tokio::test]
    async fn ingest_route_accepts_request() {
        let state = test_state();
        let (status, Json(response)) = post_channels_ingest(
            State(state),
            Json(IngestRequest {
                channel_url: "https://www.youtube.com/@someone".into(),
                person_name: Some("Someone".into()),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(response.accepted);
    }

    #[tokio::test]
    async fn status_route_reports_zero_progress_initially() {
        let state = test_state();
        let Json(report) = get_status(State(state)).await;
        assert_eq!(report.overall_progress.channels_total, 0);
    }

    #[tokio::test]
    async fn healthz_reports_db_reachable_for_in_memory_store() {
        let state = test_state();
        let (status, Json(response)) = get_healthz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.db_reachable);
    }
}
