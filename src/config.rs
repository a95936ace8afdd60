use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// How downloaded media moves from the extractor to durable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    #[default]
    StreamToStore,
    LocalThenUpload,
    LocalOnly,
}

/// Rate limit configuration for a single external service.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateLimitServiceConfig {
    pub rate: f64,
    pub burst: u32,
}

impl RateLimitServiceConfig {
    /// Fail-fast validation matching `utils/rate_limiter.py`'s `RateLimitConfig.__post_init__`.
    pub fn validate(&self) -> Result<(), IngestError> {
        if !(self.rate > 0.0) {
            return Err(IngestError::Configuration(format!(
                "rate must be positive, got {}",
                self.rate
            )));
        }
        if self.burst < 1 {
            return Err(IngestError::Configuration(format!(
                "burst must be at least 1, got {}",
                self.burst
            )));
        }
        Ok(())
    }
}

/// The recognized configuration surface from spec §6, collected into one
/// value so the coordinator and its collaborators can be constructed from
/// it directly. Parsed either from CLI/env flags (`Args::into_config`) or
/// from a config file merged on top of defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub resume_job_id: Option<String>,
    pub max_concurrent_channels: usize,
    pub max_concurrent_downloads: usize,
    pub max_videos_per_channel: Option<u32>,
    pub skip_existing_videos: bool,
    pub continue_on_error: bool,
    pub download_videos: bool,
    pub download_mode: DownloadMode,
    pub local_download_dir: Option<PathBuf>,
    pub delete_after_upload: bool,
    pub download_resolution: Option<String>,
    pub download_format: Option<String>,
    pub download_subtitles: bool,
    pub s3_bucket: Option<String>,
    pub s3_prefix: String,
    pub rate_limiting_services: HashMap<String, RateLimitServiceConfig>,
    pub recovery_dir: PathBuf,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub check_interval_seconds: u64,
    pub throttle_factor: f64,
    pub min_concurrent: usize,
    pub database_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resume_job_id: None,
            max_concurrent_channels: 3,
            max_concurrent_downloads: 3,
            max_videos_per_channel: None,
            skip_existing_videos: true,
            continue_on_error: true,
            download_videos: false,
            download_mode: DownloadMode::default(),
            local_download_dir: None,
            delete_after_upload: false,
            download_resolution: None,
            download_format: None,
            download_subtitles: false,
            s3_bucket: None,
            s3_prefix: String::from("videos"),
            rate_limiting_services: HashMap::new(),
            recovery_dir: PathBuf::from("./recovery"),
            max_cpu_percent: 80.0,
            max_memory_percent: 80.0,
            check_interval_seconds: 5,
            throttle_factor: 0.5,
            min_concurrent: 1,
            database_url: String::from("sqlite://mass_ingest.db"),
        }
    }
}

impl Config {
    /// Fail-fast validation of the whole config, run once at startup.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_concurrent_channels == 0 {
            return Err(IngestError::Configuration(
                "max_concurrent_channels must be at least 1".into(),
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(IngestError::Configuration(
                "max_concurrent_downloads must be at least 1".into(),
            ));
        }
        if self.min_concurrent == 0 {
            return Err(IngestError::Configuration(
                "min_concurrent must be at least 1".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.max_cpu_percent) {
            return Err(IngestError::Configuration(
                "max_cpu_percent must be within 0..=100".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.max_memory_percent) {
            return Err(IngestError::Configuration(
                "max_memory_percent must be within 0..=100".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.throttle_factor) {
            return Err(IngestError::Configuration(
                "throttle_factor must be within 0..=1".into(),
            ));
        }
        for (service, cfg) in &self.rate_limiting_services {
            cfg.validate().map_err(|e| {
                IngestError::Configuration(format!("service '{service}': {e}"))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(about, author, version, next_line_help = true)]
pub struct Args {
    #[arg(long, env)]
    /// Path to the pre-parsed input file of channel references to ingest.
    pub input_file: PathBuf,

    #[arg(long, env)]
    /// Resume an existing job by id instead of starting a new one.
    pub resume: Option<String>,

    #[arg(long, env)]
    /// Path to a TOML configuration file merged on top of the defaults.
    pub config_file: Option<PathBuf>,

    #[arg(long, env)]
    /// Enable per-video downloads (otherwise only metadata is recorded).
    pub download_videos: bool,

    #[arg(long, env, value_enum)]
    /// How downloaded media moves from the extractor to durable storage.
    pub download_mode: Option<DownloadMode>,

    #[arg(long, env)]
    /// Directory used for local copies of downloaded media under
    /// `local_then_upload`/`local_only` download modes.
    pub local_download_dir: Option<PathBuf>,

    #[arg(long, env)]
    /// Delete the local copy once it has been uploaded to object storage
    /// (only meaningful under `local_then_upload`).
    pub delete_after_upload: bool,

    #[arg(long, env)]
    /// Container/extension used for downloaded media, e.g. "mp4".
    pub download_format: Option<String>,

    #[arg(long, env)]
    /// Key prefix under which downloaded media is stored in object storage.
    pub s3_prefix: Option<String>,

    #[arg(long, env, default_value = "3")]
    /// Maximum number of channels processed concurrently.
    pub max_concurrent_channels: usize,

    #[arg(long, env, default_value = "3")]
    /// Maximum number of per-video downloads in flight concurrently.
    pub max_concurrent_downloads: usize,

    #[arg(long, env)]
    /// Directory for checkpoints, the dead-letter file, and progress snapshots.
    pub recovery_dir: Option<PathBuf>,

    #[arg(long, env, default_value = "127.0.0.1")]
    /// The IP address the HTTP control surface will bind to.
    pub listen_ip: String,

    #[arg(long, env, default_value = "22409")]
    /// The port number the HTTP control surface will bind to.
    pub listen_port: String,
}

impl Args {
    /// Fold CLI/env flags onto `Config::default()`.
    #[must_use]
    pub fn into_config(self) -> Config {
        let mut config = Config::default();
        config.resume_job_id = self.resume;
        config.download_videos = self.download_videos;
        config.max_concurrent_channels = self.max_concurrent_channels;
        config.max_concurrent_downloads = self.max_concurrent_downloads;
        if let Some(mode) = self.download_mode {
            config.download_mode = mode;
        }
        if let Some(dir) = self.local_download_dir {
            config.local_download_dir = Some(dir);
        }
        config.delete_after_upload = self.delete_after_upload;
        if let Some(format) = self.download_format {
            config.download_format = Some(format);
        }
        if let Some(prefix) = self.s3_prefix {
            config.s3_prefix = prefix;
        }
        if let Some(dir) = self.recovery_dir {
            config.recovery_dir = dir;
        }
        config
    }
}
