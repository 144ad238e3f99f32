use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    config::{Config, load_config_from_file, save_config_to_file},
    export::ShipmentExporter,
    ingest::IngestService,
    url_mappings::UrlMappingStore,
};
use tokio::sync::RwLock;
use utils_core::assets::config_path;

#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    ingest: IngestService,
    url_mappings: UrlMappingStore,
    exporter: ShipmentExporter,
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let config = Self::load_runtime_config(&config_path(), |name| std::env::var(name).ok())
            .await?;
        Self::warn_missing_settings(&config);

        let ingest = IngestService::new(&config)?;
        let exporter = ShipmentExporter::new(&config)?;
        let db = DBService::new().await?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            db,
            ingest,
            url_mappings: UrlMappingStore::new(),
            exporter,
        })
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn ingest(&self) -> &IngestService {
        &self.ingest
    }

    fn url_mappings(&self) -> &UrlMappingStore {
        &self.url_mappings
    }

    fn exporter(&self) -> &ShipmentExporter {
        &self.exporter
    }
}

impl LocalDeployment {
    /// Load `config.json`, write back the normalized file, then layer the
    /// environment on top. Environment values never reach the file.
    async fn load_runtime_config<F>(path: &PathBuf, lookup: F) -> Result<Config, DeploymentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_config = load_config_from_file(path).await;
        save_config_to_file(&file_config, path).await?;
        Ok(file_config.with_env_overrides(lookup))
    }

    fn warn_missing_settings(config: &Config) {
        let missing = config.missing_settings();
        if missing.is_empty() {
            tracing::info!("Image search and storage are configured");
        } else {
            tracing::warn!(
                missing = ?missing,
                "Image pipeline is not fully configured; uploads will fail until these are set"
            );
        }
    }
}
