use axum::{Json,
    http::StatusCode,
    response::IntoResponse
};
use image::ImageError;
use serde_json::json;
use thiserror::Error;

use crate::{processing::TransformError, storage::StorageError};

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request validation failures; the message is the whole response body.
    #[error("Bad request: {0}")]
    BadRequest(&'static str),

    #[error("Multipart error: {0}")]
    MultipartError(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Processing timed out: {0}")]
    ProcessingTimeout(String),

    #[error("File processing error: {0}")]
    FileProcessingError(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::StorageError(err.to_string())
    }
}

impl From<TransformError> for AppError {
    fn from(err: TransformError) -> Self {
        let msg = err.to_string();
        match err {
            TransformError::Open(..) => AppError::StorageError(msg),
            TransformError::Decode(ImageError::Limits(_)) => AppError::PayloadTooLarge(msg),
            TransformError::Decode(ImageError::IoError(io))
                if !matches!(
                    io.kind(),
                    std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                AppError::StorageError(msg)
            }
            TransformError::Decode(_) => AppError::InvalidImage(msg),
            TransformError::Encode(ImageError::IoError(_)) | TransformError::Write(..) => {
                AppError::StorageError(msg)
            }
            TransformError::Timeout(_) => AppError::ProcessingTimeout(msg),
            TransformError::Encode(_) | TransformError::InvalidPath(_) | TransformError::Task(_) => {
                AppError::FileProcessingError(msg)
            }
        }
    }
}

/// Convert `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        // Map application errors to HTTP status codes, kinds and messages.
        // Server-side details are logged, never echoed.
        let (status, kind, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, None, msg.to_string()),
            AppError::MultipartError(msg) => {
                (StatusCode::BAD_REQUEST, Some("invalid_multipart"), msg)
            }
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, Some("payload_too_large"), msg)
            }
            AppError::InvalidImage(msg) => {
                tracing::warn!("Rejected upload: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Some("invalid_image"),
                    "invalid image".to_string(),
                )
            }
            AppError::StorageError(msg) => {
                tracing::error!("Storage Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some("storage_error"),
                    "storage error".to_string(),
                )
            }
            AppError::ProcessingTimeout(msg) => {
                tracing::error!("Processing Timeout: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Some("processing_timeout"),
                    "image processing timed out".to_string(),
                )
            }
            AppError::FileProcessingError(msg) => {
                tracing::error!("Processing Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some("processing_error"),
                    "image processing failed".to_string(),
                )
            }
        };

        // Validation errors keep the bare `{"error": ...}` body clients already parse.
        let body = match kind {
            Some(kind) => Json(json!({ "error": message, "kind": kind })),
            None => Json(json!({ "error": message })),
        };
        (status, body).into_response()
    }
}
