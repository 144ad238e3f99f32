use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::header,
    response::{IntoResponse, Json as ResponseJson},
    routing::{get, post},
};
use deployment::Deployment;
use serde::Deserialize;
use services::services::{
    ingest::{IndexListing, IngestOutcome, SearchOutcome, Upload},
    placeholder::{self, render_placeholder_svg},
};
use utils_core::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

/// Multipart bodies may carry images up to the 100 MiB search limit plus form overhead.
pub const UPLOAD_BODY_LIMIT: usize = 110 * 1024 * 1024;

const DEFAULT_LIST_COUNT: u32 = 100;

/// Read the `image` (or `file`) part of a multipart form. A separate
/// `filename` text part overrides the name sent with the file.
pub(crate) async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload: Option<Upload> = None;
    let mut filename_override: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") | Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                upload = Some(Upload {
                    bytes: bytes.to_vec(),
                    filename,
                    content_type,
                });
            }
            Some("filename") => {
                filename_override = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let mut upload =
        upload.ok_or_else(|| ApiError::BadRequest("No image file provided".to_string()))?;
    if let Some(name) = filename_override
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
    {
        upload.filename = Some(name);
    }
    Ok(upload)
}

pub async fn add_image(
    State(deployment): State<DeploymentImpl>,
    multipart: Multipart,
) -> Result<ResponseJson<ApiResponse<IngestOutcome>>, ApiError> {
    let upload = read_upload(multipart).await?;
    tracing::debug!(
        filename = ?upload.filename,
        size = upload.bytes.len(),
        "Adding image to library"
    );

    let outcome = deployment
        .ingest()
        .add_to_library(deployment.db(), upload)
        .await?;
    let message = outcome.message();
    Ok(ResponseJson(ApiResponse::success_with_message(
        outcome, message,
    )))
}

pub async fn search_images(
    State(deployment): State<DeploymentImpl>,
    multipart: Multipart,
) -> Result<ResponseJson<ApiResponse<SearchOutcome>>, ApiError> {
    let upload = read_upload(multipart).await?;
    let outcome = deployment.ingest().search(upload).await?;
    let message = outcome.message();
    Ok(ResponseJson(ApiResponse::success_with_message(
        outcome, message,
    )))
}

#[derive(Debug, Deserialize)]
pub struct IndexedQuery {
    #[serde(default)]
    pub start: u32,
    pub count: Option<u32>,
}

pub async fn list_indexed(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<IndexedQuery>,
) -> Result<ResponseJson<ApiResponse<IndexListing>>, ApiError> {
    let count = query.count.unwrap_or(DEFAULT_LIST_COUNT);
    let listing = deployment
        .ingest()
        .list_indexed(query.start, count)
        .await?;
    Ok(ResponseJson(ApiResponse::success(listing)))
}

#[derive(Debug, Deserialize)]
pub struct PlaceholderQuery {
    pub cont_sign: Option<String>,
    #[serde(default)]
    pub score: f64,
}

pub async fn placeholder_image(Query(query): Query<PlaceholderQuery>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, placeholder::CONTENT_TYPE),
            (header::CACHE_CONTROL, placeholder::CACHE_CONTROL),
        ],
        render_placeholder_svg(query.cont_sign.as_deref(), query.score),
    )
}

pub fn router() -> Router<DeploymentImpl> {
    let uploads = Router::new()
        .route("/add", post(add_image))
        .route("/search", post(search_images))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT));

    let inner = Router::new()
        .merge(uploads)
        .route("/indexed", get(list_indexed))
        .route("/placeholder", get(placeholder_image));

    Router::new().nest("/images", inner)
}
