use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::handlers::{acquire_workspace, WorkspaceLock};
use crate::models::UploadResponse;
use crate::services::Pipeline;

/// Stores the first file field of the form as the current upload.
pub async fn upload(
    mut payload: Multipart,
    pipeline: web::Data<Pipeline>,
    config: web::Data<Config>,
    lock: web::Data<WorkspaceLock>,
) -> AppResult<HttpResponse> {
    let limit = config.max_upload_bytes;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::PayloadTooLarge(limit));
            }
            bytes.extend_from_slice(&chunk);
        }

        if let Some(filename) = filename {
            if upload.is_none() {
                upload = Some((filename, bytes));
            }
        }
    }

    let (filename, bytes) =
        upload.ok_or_else(|| AppError::BadRequest("No file in upload form".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest(format!("Uploaded file {} is empty", filename)));
    }

    let size = bytes.len();
    let guard = acquire_workspace(lock).await;
    let files = pipeline.files().clone();
    let original_image = web::block(move || {
        let _guard = guard;
        files.store_upload(&bytes)
    })
    .await??;
    info!("Received upload {} ({} bytes)", filename, size);

    Ok(HttpResponse::Ok().json(UploadResponse {
        message: "Image uploaded successfully".to_string(),
        filename,
        size,
        original_image,
    }))
}
