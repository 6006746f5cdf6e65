use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use bytes::Bytes;
use tracing::{error, info};

use crate::{
    error::AppError,
    models::UploadResponse,
    state::AppState,
    utils::sanitize_filename,
};

/// Multipart field carrying the upload.
pub const IMAGE_FIELD: &str = "image";

/// URL prefix the upload directory is served under.
pub const PUBLIC_UPLOADS_PATH: &str = "/uploads";

/// Accept one image, store it and return the URL of its thumbnail.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        // A part without a `filename` parameter is a plain form value, not a file.
        let Some(original_filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        if original_filename.is_empty() {
            return Err(AppError::BadRequest("No selected file"));
        }

        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((original_filename, data));
        break;
    }

    let (original_filename, data) = upload.ok_or(AppError::BadRequest("No image part"))?;

    // Enforce maximum file size
    if data.len() as u64 > state.config.max_file_size {
        error!(
            "File size {} exceeds maximum limit of {} bytes",
            data.len(),
            state.config.max_file_size
        );

        return Err(AppError::PayloadTooLarge(format!(
            "File size {} exceeds maximum limit of {} bytes",
            data.len(),
            state.config.max_file_size
        )));
    }

    let filename =
        sanitize_filename(&original_filename).ok_or(AppError::BadRequest("Invalid filename"))?;

    let size = data.len();
    let stored_path = state.storage.store(&filename, data).await?;
    let processed_path = state.transformer.process(&stored_path).await?;

    let processed_name = processed_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            AppError::FileProcessingError(format!("Unexpected output path {:?}", processed_path))
        })?;

    info!(
        original = %original_filename,
        stored = %stored_path.display(),
        processed = %processed_name,
        size,
        "Image uploaded"
    );

    Ok(Json(UploadResponse {
        image_url: format!("{}/{}", PUBLIC_UPLOADS_PATH, processed_name),
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn multipart_error(e: MultipartError) -> AppError {
    error!("Error parsing multipart: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::MultipartError(format!("Failed to parse multipart form: {}", e))
    }
}
