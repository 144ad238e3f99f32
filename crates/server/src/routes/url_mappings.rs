use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use services::services::url_mappings::{DEFAULT_MAX_AGE, UrlMapping};
use url::Url;
use utils_core::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateMappingRequest {
    pub url: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMappingRequest {
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    pub max_age_hours: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub removed: usize,
    pub remaining: usize,
}

fn not_found(short_id: &str) -> ApiError {
    ApiError::NotFound(format!("URL mapping {short_id} not found"))
}

pub async fn list_mappings(
    State(deployment): State<DeploymentImpl>,
) -> ResponseJson<ApiResponse<Vec<UrlMapping>>> {
    ResponseJson(ApiResponse::success(deployment.url_mappings().all()))
}

pub async fn create_mapping(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateMappingRequest>,
) -> Result<ResponseJson<ApiResponse<UrlMapping>>, ApiError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ApiError::BadRequest("url is required".to_string()));
    }
    Url::parse(url).map_err(|err| ApiError::BadRequest(format!("Invalid url: {err}")))?;

    let mapping = deployment.url_mappings().add(url, payload.metadata);
    Ok(ResponseJson(ApiResponse::success(mapping)))
}

pub async fn get_mapping(
    State(deployment): State<DeploymentImpl>,
    Path(short_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<UrlMapping>>, ApiError> {
    let mapping = deployment
        .url_mappings()
        .get(&short_id)
        .ok_or_else(|| not_found(&short_id))?;
    Ok(ResponseJson(ApiResponse::success(mapping)))
}

pub async fn update_mapping(
    State(deployment): State<DeploymentImpl>,
    Path(short_id): Path<String>,
    Json(payload): Json<UpdateMappingRequest>,
) -> Result<ResponseJson<ApiResponse<UrlMapping>>, ApiError> {
    let mapping = deployment
        .url_mappings()
        .update_metadata(&short_id, payload.metadata)
        .ok_or_else(|| not_found(&short_id))?;
    Ok(ResponseJson(ApiResponse::success(mapping)))
}

pub async fn delete_mapping(
    State(deployment): State<DeploymentImpl>,
    Path(short_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<UrlMapping>>, ApiError> {
    let mapping = deployment
        .url_mappings()
        .remove(&short_id)
        .ok_or_else(|| not_found(&short_id))?;
    Ok(ResponseJson(ApiResponse::success(mapping)))
}

pub async fn cleanup_mappings(
    State(deployment): State<DeploymentImpl>,
    payload: Option<Json<CleanupRequest>>,
) -> ResponseJson<ApiResponse<CleanupResult>> {
    let max_age = payload
        .and_then(|Json(request)| request.max_age_hours)
        .map(|hours| Duration::from_secs(hours.saturating_mul(60 * 60)))
        .unwrap_or(DEFAULT_MAX_AGE);
    let store = deployment.url_mappings();
    let removed = store.cleanup_expired(max_age);

    ResponseJson(ApiResponse::success(CleanupResult {
        removed,
        remaining: store.len(),
    }))
}

pub fn router() -> Router<DeploymentImpl> {
    let inner = Router::new()
        .route("/", get(list_mappings).post(create_mapping))
        .route("/cleanup", post(cleanup_mappings))
        .route(
            "/{short_id}",
            get(get_mapping).put(update_mapping).delete(delete_mapping),
        );

    Router::new().nest("/urls/mapping", inner)
}
