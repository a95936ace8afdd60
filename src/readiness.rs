use tracing::info;

use crate::config::Config;
use crate::error::IngestError;
use crate::extractor::YtDlpExtractor;

/// Fail-fast startup checks, matching `validate_deployment_readiness.py`:
/// the extractor binary is present and runnable, the recovery directory is
/// writable, and every configured rate-limiter service has valid settings.
/// Run once from `main` before accepting any work (§10.3).
pub async fn check(config: &Config, extractor: &YtDlpExtractor) -> Result<(), IngestError> {
    extractor.check_available().await?;

    tokio::fs::create_dir_all(&config.recovery_dir)
        .await
        .map_err(|err| {
            IngestError::Configuration(format!(
                "recovery_dir '{}' is not writable: {err}",
                config.recovery_dir.display()
            ))
        })?;
    let probe_path = config.recovery_dir.join(".readiness-probe");
    tokio::fs::write(&probe_path, b"ok")
        .await
        .map_err(|err| {
            IngestError::Configuration(format!(
                "recovery_dir '{}' is not writable: {err}",
                config.recovery_dir.display()
            ))
        })?;
    let _ = tokio::fs::remove_file(&probe_path).await;

    for (service, service_config) in &config.rate_limiting_services {
        service_config
            .validate()
            .map_err(|err| IngestError::Configuration(format!("service '{service}': {err}")))?;
    }

    config.validate()?;

    info!("deployment readiness checks passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_unwritable_recovery_dir_as_configuration_error() {
        let config = Config {
            recovery_dir: std::path::PathBuf::from("/proc/cannot-create-here"),
            ..Config::default()
        };
        let extractor = YtDlpExtractor::new("true");
        let result = check(&config, &extractor).await;
        assert!(result.is_err());
    }
}
