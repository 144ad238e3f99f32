use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::{
    DbErr,
    models::{gallery_item::GalleryError, shipment::ShipmentError},
};
use deployment::DeploymentError;
use services::services::{
    compression::CompressionError, config::ConfigError, export::ExportError,
    ingest::IngestError, vision::VisionError,
};
use thiserror::Error;
use utils_core::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Shipment(#[from] ShipmentError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<&'static str> for ApiError {
    fn from(msg: &'static str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }
}

fn ingest_status(err: &IngestError) -> StatusCode {
    match err {
        IngestError::EmptyUpload
        | IngestError::TooLarge { .. }
        | IngestError::Vision(VisionError::TooLarge { .. }) => StatusCode::BAD_REQUEST,
        IngestError::Compression(CompressionError::UnknownFormat)
        | IngestError::Compression(CompressionError::Image(_)) => StatusCode::BAD_REQUEST,
        IngestError::Vision(VisionError::NotConfigured) | IngestError::StorageNotConfigured => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        IngestError::Vision(_) | IngestError::Storage(_) => StatusCode::BAD_GATEWAY,
        IngestError::Gallery(GalleryError::Validation(_)) => StatusCode::BAD_REQUEST,
        IngestError::Gallery(_) | IngestError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Gallery(err) => match err {
                GalleryError::NotFound => (StatusCode::NOT_FOUND, "GalleryError"),
                GalleryError::Duplicate(_) => (StatusCode::CONFLICT, "GalleryError"),
                GalleryError::Validation(_) => (StatusCode::BAD_REQUEST, "GalleryError"),
                GalleryError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "GalleryError"),
            },
            ApiError::Shipment(err) => match err {
                ShipmentError::NotFound => (StatusCode::NOT_FOUND, "ShipmentError"),
                ShipmentError::Validation(_) => (StatusCode::BAD_REQUEST, "ShipmentError"),
                ShipmentError::InvalidTransition { .. } => (StatusCode::CONFLICT, "ShipmentError"),
                ShipmentError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ShipmentError"),
            },
            ApiError::Ingest(err) => (ingest_status(err), "IngestError"),
            ApiError::Export(err) => match err {
                ExportError::Empty => (StatusCode::BAD_REQUEST, "ExportError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ExportError"),
            },
            ApiError::Deployment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentError"),
            ApiError::Database(db_err) => match db_err {
                DbErr::RecordNotFound(_) => (StatusCode::NOT_FOUND, "DatabaseError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            },
            ApiError::Config(err) => match err {
                ConfigError::ValidationError(_) => (StatusCode::BAD_REQUEST, "ConfigError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            },
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError"),
            ApiError::Multipart(_) => (StatusCode::BAD_REQUEST, "MultipartError"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "ForbiddenError"),
        };

        let error_message = match &self {
            ApiError::Gallery(GalleryError::Database(_))
            | ApiError::Shipment(ShipmentError::Database(_)) => {
                format!("{}: {}", error_type, self)
            }
            ApiError::Gallery(err) => err.to_string(),
            ApiError::Shipment(err) => err.to_string(),
            ApiError::Ingest(IngestError::Compression(_)) => {
                "This file is not a supported image. Please upload a PNG, JPG, GIF or WebP image."
                    .to_string()
            }
            ApiError::Ingest(IngestError::TooLarge { size, max }) => format!(
                "This image is too large ({:.1} MB). Maximum file size is {:.1} MB.",
                *size as f64 / 1_048_576.0,
                *max as f64 / 1_048_576.0
            ),
            ApiError::Ingest(err) => err.to_string(),
            ApiError::Export(ExportError::Empty) => "No shipments to export".to_string(),
            ApiError::Multipart(_) => {
                "Failed to upload file. Please ensure the file is valid and try again.".to_string()
            }
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::Internal(msg) => msg.clone(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Conflict(msg) => msg.clone(),
            ApiError::Forbidden(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };

        if status_code.is_server_error() {
            tracing::error!(
                status = %status_code,
                error_type,
                error = %self,
                "API request failed"
            );
        }
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use db::types::ShipmentStatus;

    use super::*;

    #[test]
    fn api_error_maps_to_expected_http_statuses() {
        assert_eq!(
            ApiError::BadRequest("bad".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("nope".to_string())
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("missing".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("conflict".to_string())
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal("boom".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn domain_errors_map_to_expected_http_statuses() {
        assert_eq!(
            ApiError::from(GalleryError::NotFound)
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(GalleryError::Duplicate("1,2".to_string()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ShipmentError::Validation("address is required".to_string()))
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ShipmentError::InvalidTransition {
                from: ShipmentStatus::Completed,
                to: ShipmentStatus::Shipped,
            })
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ExportError::Empty).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn ingest_errors_separate_client_and_upstream_failures() {
        assert_eq!(
            ApiError::from(IngestError::EmptyUpload)
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IngestError::TooLarge {
                size: 200,
                max: 100
            })
            .into_response()
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IngestError::StorageNotConfigured)
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(IngestError::Vision(VisionError::Api {
                code: 216201,
                message: "image format error".to_string(),
            }))
            .into_response()
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
