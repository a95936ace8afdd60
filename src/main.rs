use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use crate::config::Args;
use crate::coordinator::Coordinator;
use crate::extractor::YtDlpExtractor;
use crate::handlers::{get_healthz, get_status, post_channels_ingest, post_retry_dead_letters, HandlerState};
use crate::models::{ChannelRef, Person};
use crate::persistence::SqliteStore;
use crate::storage::FilesystemStore;

mod checkpoint;
mod circuit_breaker;
mod concurrent;
mod config;
mod coordinator;
mod dead_letter;
mod error;
mod extractor;
mod handlers;
mod models;
mod persistence;
mod progress;
mod rate_limiter;
mod readiness;
mod recovery;
mod resource_monitor;
mod retry;
mod storage;
mod transaction;

/// Reads `input_file` as one channel URL per line (optionally
/// `name<TAB>url`), the contract spec §4's `(Person, ChannelRef)` boundary
/// names without prescribing a concrete file format (Non-goals §9).
async fn read_channel_refs(path: &std::path::Path) -> anyhow::Result<Vec<ChannelRef>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut refs = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, url) = line.split_once('\t').unwrap_or((line, line));
        refs.push(ChannelRef {
            person: Person {
                id: None,
                name: name.to_string(),
                email: None,
                person_type: None,
                channel_url: url.to_string(),
                channel_id: None,
                created_at: None,
                updated_at: None,
            },
        });
    }
    Ok(refs)
}

async fn shutdown_upon_signal(send_shutdown: tokio::sync::broadcast::Sender<()>) {
    let _ = tokio::signal::ctrl_c().await;
    event!(Level::INFO, "Received signal to shut down gracefully");
    drop(send_shutdown);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .compact();
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(format_layer)
        .init();
    event!(Level::DEBUG, "Launching...");

    let listen_ip = args.listen_ip.clone();
    let listen_port = args.listen_port.clone();
    let input_file = args.input_file.clone();
    let config = args.into_config();

    let extractor = Arc::new(YtDlpExtractor::new("yt-dlp"));
    readiness::check(&config, &extractor).await?;

    let pool = persistence::init_pool(&config.database_url).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let object_store = Arc::new(FilesystemStore::new(
        config
            .local_download_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./downloads")),
    ));

    let job_id = config.resume_job_id.clone().unwrap_or_else(|| format!("job-{}", uuid::Uuid::new_v4()));
    let coordinator = Arc::new(Coordinator::new(
        config.clone(),
        job_id.clone(),
        store,
        extractor.clone(),
        object_store,
    ));
    if config.resume_job_id.is_some() {
        coordinator.rehydrate().await?;
    }

    let (send_shutdown, _) = tokio::sync::broadcast::channel::<()>(1);

    let ingest_handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            match read_channel_refs(&input_file).await {
                Ok(refs) => {
                    if let Err(err) = coordinator.process_input_file(&job_id, refs).await {
                        event!(Level::ERROR, error = %err, "ingestion run failed");
                    }
                }
                Err(err) => event!(Level::ERROR, error = %err, "failed to read input file"),
            }
        })
    };

    let handler_state = HandlerState {
        coordinator: coordinator.clone(),
        extractor,
        in_flight: Arc::new(Mutex::new(0)),
    };

    let mutating_routes = axum::Router::new()
        .route("/channels/ingest", axum::routing::post(post_channels_ingest))
        .route(
            "/dead-letters/retry",
            axum::routing::post(post_retry_dead_letters),
        )
        .layer(tower_http::validate_request::ValidateRequestHeaderLayer::accept("application/json"));

    let router = axum::Router::new()
        .route("/healthz", axum::routing::get(get_healthz))
        .route("/status", axum::routing::get(get_status))
        .merge(mutating_routes)
        .with_state(handler_state);

    let listener = tokio::net::TcpListener::bind(format!("{listen_ip}:{listen_port}")).await?;
    event!(Level::INFO, "Listening for HTTP requests on {}:{}...", listen_ip, listen_port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_upon_signal(send_shutdown))
        .await?;

    let _ = ingest_handle.await;
    coordinator.shutdown().await?;

    Ok(())
}
