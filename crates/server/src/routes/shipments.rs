use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    middleware::from_fn_with_state,
    response::{Json as ResponseJson, Response},
    routing::{delete, get, post},
};
use db::{
    models::{
        gallery_item::{GalleryError, GalleryItem},
        shipment::{CreateShipment, Shipment, ShipmentError, ShipmentFilter, UpdateShipment},
    },
    types::ShipmentStatus,
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::{export::ExportSelection, ingest::ShipmentImage};
use utils_core::response::ApiResponse;
use uuid::Uuid;

use crate::{
    DeploymentImpl,
    error::ApiError,
    middleware::load_shipment_middleware,
    routes::images::{UPLOAD_BODY_LIMIT, read_upload},
};

#[derive(Debug, Deserialize)]
pub struct CreateFromGallery {
    pub gallery_item_id: Uuid,
    pub address: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub size: String,
    pub quantity: Option<i32>,
    #[serde(default)]
    pub notes: String,
    /// Defaults to the gallery item's tags.
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ShipmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusRequest {
    pub ids: Vec<Uuid>,
    pub status: ShipmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct BulkIdsRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BulkTagsRequest {
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    /// Export every pending shipment when absent or empty.
    #[serde(default)]
    pub ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub affected: u64,
}

fn require_ids(ids: &[Uuid]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ApiError::BadRequest("No shipments selected".to_string()));
    }
    Ok(())
}

pub async fn get_shipments(
    State(deployment): State<DeploymentImpl>,
    Query(filter): Query<ShipmentFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<Shipment>>>, ApiError> {
    let shipments = Shipment::find_all(&deployment.db().pool, &filter).await?;
    Ok(ResponseJson(ApiResponse::success(shipments)))
}

pub async fn create_shipment(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateShipment>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    let shipment = Shipment::create(&deployment.db().pool, &payload).await?;
    tracing::debug!(shipment_id = %shipment.id, "Created shipment");
    Ok(ResponseJson(ApiResponse::success(shipment)))
}

pub async fn upload_shipment_image(
    State(deployment): State<DeploymentImpl>,
    multipart: Multipart,
) -> Result<ResponseJson<ApiResponse<ShipmentImage>>, ApiError> {
    let upload = read_upload(multipart).await?;
    let image = deployment.ingest().upload_shipment_image(upload).await?;
    Ok(ResponseJson(ApiResponse::success(image)))
}

pub async fn create_from_gallery(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateFromGallery>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    let pool = &deployment.db().pool;
    let item = GalleryItem::find_by_id(pool, payload.gallery_item_id)
        .await?
        .ok_or(GalleryError::NotFound)?;

    let shipment = Shipment::create(
        pool,
        &CreateShipment {
            address: payload.address,
            material: payload.material,
            size: payload.size,
            quantity: payload.quantity,
            notes: payload.notes,
            status: None,
            tags: payload.tags.unwrap_or(item.tags),
            image_url: Some(item.image_url),
            cont_sign: Some(item.cont_sign),
            gallery_item_id: Some(item.id),
        },
    )
    .await?;
    tracing::debug!(
        shipment_id = %shipment.id,
        gallery_item_id = %item.id,
        "Created shipment from gallery item"
    );
    Ok(ResponseJson(ApiResponse::success(shipment)))
}

pub async fn get_shipment(
    Extension(shipment): Extension<Shipment>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(shipment)))
}

pub async fn update_shipment(
    Extension(shipment): Extension<Shipment>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<UpdateShipment>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    let updated = Shipment::update(&deployment.db().pool, shipment.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn delete_shipment(
    Extension(shipment): Extension<Shipment>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows_affected = Shipment::delete(&deployment.db().pool, shipment.id).await?;
    if rows_affected == 0 {
        return Err(ShipmentError::NotFound.into());
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn change_status(
    Extension(shipment): Extension<Shipment>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<StatusRequest>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    let updated = Shipment::transition(&deployment.db().pool, shipment.id, payload.status).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn add_shipment_tag(
    Extension(shipment): Extension<Shipment>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<TagRequest>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    if payload.tag.trim().is_empty() {
        return Err(ShipmentError::Validation("tag cannot be empty".to_string()).into());
    }
    let updated = Shipment::add_tag(&deployment.db().pool, shipment.id, &payload.tag).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn remove_shipment_tag(
    State(deployment): State<DeploymentImpl>,
    Path((shipment_id, tag)): Path<(Uuid, String)>,
) -> Result<ResponseJson<ApiResponse<Shipment>>, ApiError> {
    let updated = Shipment::remove_tag(&deployment.db().pool, shipment_id, &tag).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn remove_tag_everywhere(
    State(deployment): State<DeploymentImpl>,
    Path(tag): Path<String>,
) -> Result<ResponseJson<ApiResponse<BulkResult>>, ApiError> {
    let affected = Shipment::remove_tag_everywhere(&deployment.db().pool, &tag).await?;
    tracing::info!(%tag, affected, "Removed tag from shipments");
    Ok(ResponseJson(ApiResponse::success(BulkResult { affected })))
}

pub async fn bulk_set_status(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<BulkStatusRequest>,
) -> Result<ResponseJson<ApiResponse<BulkResult>>, ApiError> {
    require_ids(&payload.ids)?;
    let affected =
        Shipment::set_status_many(&deployment.db().pool, &payload.ids, payload.status).await?;
    Ok(ResponseJson(ApiResponse::success(BulkResult { affected })))
}

pub async fn bulk_delete(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<BulkIdsRequest>,
) -> Result<ResponseJson<ApiResponse<BulkResult>>, ApiError> {
    require_ids(&payload.ids)?;
    let affected = Shipment::delete_many(&deployment.db().pool, &payload.ids).await?;
    tracing::info!(requested = payload.ids.len(), affected, "Bulk deleted shipments");
    Ok(ResponseJson(ApiResponse::success(BulkResult { affected })))
}

pub async fn bulk_edit_tags(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<BulkTagsRequest>,
) -> Result<ResponseJson<ApiResponse<Vec<Shipment>>>, ApiError> {
    require_ids(&payload.ids)?;
    let updated = Shipment::edit_tags_many(
        &deployment.db().pool,
        &payload.ids,
        &payload.add,
        &payload.remove,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

pub async fn export_shipments(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let pool = &deployment.db().pool;
    let (shipments, selection) = match payload.ids.filter(|ids| !ids.is_empty()) {
        Some(ids) => {
            let shipments = Shipment::find_many(pool, &ids).await?;
            let selection = ExportSelection::Selected(shipments.len());
            (shipments, selection)
        }
        None => (
            Shipment::find_by_status(pool, ShipmentStatus::Pending).await?,
            ExportSelection::Pending,
        ),
    };

    let archive = deployment.exporter().export(&shipments, selection).await?;
    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from(archive.bytes))
        .map_err(|err| ApiError::Internal(format!("Failed to build export response: {err}")))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let shipment_router = Router::new()
        .route(
            "/",
            get(get_shipment)
                .put(update_shipment)
                .delete(delete_shipment),
        )
        .route("/status", post(change_status))
        .route("/tags", post(add_shipment_tag))
        .layer(from_fn_with_state(
            deployment.clone(),
            load_shipment_middleware::<DeploymentImpl>,
        ));

    let bulk_router = Router::new()
        .route("/status", post(bulk_set_status))
        .route("/delete", post(bulk_delete))
        .route("/tags", post(bulk_edit_tags));

    let inner = Router::new()
        .route("/", get(get_shipments).post(create_shipment))
        .route(
            "/upload",
            post(upload_shipment_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/from-gallery", post(create_from_gallery))
        .route("/export", post(export_shipments))
        .route("/tags/{tag}", delete(remove_tag_everywhere))
        .route("/{shipment_id}/tags/{tag}", delete(remove_shipment_tag))
        .nest("/bulk", bulk_router)
        .nest("/{shipment_id}", shipment_router);

    Router::new().nest("/shipments", inner)
}
