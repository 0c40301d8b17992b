use actix_files::NamedFile;
use actix_web::web;

use crate::error::{AppError, AppResult};
use crate::services::Pipeline;

pub async fn serve_debug_file(
    path: web::Path<String>,
    pipeline: web::Data<Pipeline>,
) -> AppResult<NamedFile> {
    let filename = path.into_inner();
    let full_path = pipeline
        .files()
        .resolve_debug_file(&filename)
        .ok_or_else(|| AppError::NotFound(format!("Debug file {}", filename)))?;

    Ok(NamedFile::open(full_path)?.use_last_modified(true))
}
