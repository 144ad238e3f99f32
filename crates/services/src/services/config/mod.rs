use std::path::PathBuf;

use thiserror::Error;

mod schema;

pub use schema::{
    AccessControlConfig, AccessControlMode, CURRENT_CONFIG_VERSION, Config, IngestConfig,
    StorageConfig, VisionConfig,
};

pub const ENV_API_KEY: &str = "BAIDU_API_KEY";
pub const ENV_SECRET_KEY: &str = "BAIDU_SECRET_KEY";
pub const ENV_API_BASE: &str = "BAIDU_API_BASE";
pub const ENV_BOS_ENDPOINT: &str = "BAIDU_BOS_ENDPOINT";
pub const ENV_BOS_BUCKET: &str = "BAIDU_BOS_BUCKET";
pub const ENV_BOS_DOMAIN: &str = "BAIDU_BOS_DOMAIN";
pub const ENV_BOS_AK: &str = "BAIDU_BOS_AK";
pub const ENV_BOS_SK: &str = "BAIDU_BOS_SK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{0} is not configured")]
    Missing(&'static str),
}

/// Will always return config, falling back to defaults on missing/invalid files.
pub async fn load_config_from_file(config_path: &PathBuf) -> Config {
    match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => Config::from_raw(&raw_config),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                tracing::info!("No config file found, creating one");
            } else {
                tracing::warn!("Failed to read config file: {}", err);
            }
            Config::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(
    config: &Config,
    config_path: &PathBuf,
) -> Result<(), ConfigError> {
    let normalized = config.clone().normalized();
    let raw_config = serde_json::to_string_pretty(&normalized)?;
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}

/// File config with process environment layered on top.
pub fn apply_process_env(config: Config) -> Config {
    config.with_env_overrides(|name| std::env::var(name).ok())
}

/// Config pointing every vendor endpoint at a running mock.
#[cfg(test)]
pub(crate) fn mock_vendor_config(vendor: &test_support::vendor::MockVendor) -> Config {
    Config::default().with_env_overrides(|name| vendor.env_var(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults_and_save_round_trips() {
        let dir = test_support::temp_root();
        let path = dir.path().join("config.json");

        let config = load_config_from_file(&path).await;
        assert_eq!(config.config_version, CURRENT_CONFIG_VERSION);

        let mut changed = config.clone();
        changed.storage.bucket = Some("catalog-images".to_string());
        save_config_to_file(&changed, &path).await.unwrap();

        let reloaded = load_config_from_file(&path).await;
        assert_eq!(reloaded.storage.bucket.as_deref(), Some("catalog-images"));
    }
}
