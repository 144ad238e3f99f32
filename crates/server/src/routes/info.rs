use axum::{
    Router,
    extract::State,
    response::Json as ResponseJson,
    routing::get,
};
use deployment::Deployment;
use serde::Serialize;
use services::services::config::Config;
use utils_core::response::ApiResponse;

use crate::DeploymentImpl;

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/info", get(get_system_info))
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub image_search: bool,
    pub storage: bool,
    pub missing_settings: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub version: &'static str,
    pub config: Config,
    pub capabilities: Capabilities,
    pub url_mappings: usize,
}

async fn get_system_info(
    State(deployment): State<DeploymentImpl>,
) -> ResponseJson<ApiResponse<SystemInfo>> {
    let config = deployment.config().read().await;
    let capabilities = Capabilities {
        image_search: deployment.ingest().vision().is_configured(),
        storage: deployment.ingest().storage().is_configured(),
        missing_settings: config.missing_settings(),
    };

    ResponseJson(ApiResponse::success(SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        config: config.redacted(),
        capabilities,
        url_mappings: deployment.url_mappings().len(),
    }))
}
