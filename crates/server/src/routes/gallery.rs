use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{delete, get, post},
};
use db::models::gallery_item::{
    CreateGalleryItem, GalleryError, GalleryFilter, GalleryItem, UpdateGalleryItem,
};
use deployment::Deployment;
use serde::Deserialize;
use utils_core::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::load_gallery_item_middleware};

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub tag: String,
}

pub async fn get_gallery(
    State(deployment): State<DeploymentImpl>,
    Query(filter): Query<GalleryFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<GalleryItem>>>, ApiError> {
    let items = GalleryItem::find_all(&deployment.db().pool, &filter).await?;
    Ok(ResponseJson(ApiResponse::success(items)))
}

pub async fn create_gallery_item(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateGalleryItem>,
) -> Result<ResponseJson<ApiResponse<GalleryItem>>, ApiError> {
    let item = GalleryItem::create(&deployment.db().pool, &payload).await?;
    tracing::debug!(item_id = %item.id, cont_sign = %item.cont_sign, "Created gallery item");
    Ok(ResponseJson(ApiResponse::success(item)))
}

pub async fn get_gallery_item(
    Extension(item): Extension<GalleryItem>,
) -> Result<ResponseJson<ApiResponse<GalleryItem>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(item)))
}

pub async fn update_gallery_item(
    Extension(item): Extension<GalleryItem>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateGalleryItem>,
) -> Result<ResponseJson<ApiResponse<GalleryItem>>, ApiError> {
    let updated = GalleryItem::update(&deployment.db().pool, item.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn delete_gallery_item(
    Extension(item): Extension<GalleryItem>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows_affected = GalleryItem::delete(&deployment.db().pool, item.id).await?;
    if rows_affected == 0 {
        return Err(GalleryError::NotFound.into());
    }
    // The search index entry and the stored object are left in place.
    tracing::info!(item_id = %item.id, cont_sign = %item.cont_sign, "Deleted gallery item");
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn add_gallery_tag(
    Extension(item): Extension<GalleryItem>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<TagRequest>,
) -> Result<ResponseJson<ApiResponse<GalleryItem>>, ApiError> {
    let updated = GalleryItem::add_tag(&deployment.db().pool, item.id, &payload.tag).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn remove_gallery_tag(
    State(deployment): State<DeploymentImpl>,
    Path((item_id, tag)): Path<(Uuid, String)>,
) -> Result<ResponseJson<ApiResponse<GalleryItem>>, ApiError> {
    let updated = GalleryItem::remove_tag(&deployment.db().pool, item_id, &tag).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let item_router = Router::new()
        .route(
            "/",
            get(get_gallery_item)
                .put(update_gallery_item)
                .delete(delete_gallery_item),
        )
        .route("/tags", post(add_gallery_tag))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_gallery_item_middleware::<DeploymentImpl>,
        ));

    let inner = Router::new()
        .route("/", get(get_gallery).post(create_gallery_item))
        .route("/{item_id}/tags/{tag}", delete(remove_gallery_tag))
        .nest("/{item_id}", item_router);

    Router::new().nest("/gallery", inner)
}
