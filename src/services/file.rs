use image::{DynamicImage, RgbImage};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::constants::{self, DEBUG_ROUTE};
use crate::error::{AppError, AppResult};

/// Owns the fixed upload path and the shared debug image directory.
#[derive(Clone)]
pub struct FileService {
    upload_path: PathBuf,
    debug_dir: PathBuf,
}

impl FileService {
    pub fn new(upload_path: PathBuf, debug_dir: PathBuf) -> Self {
        Self {
            upload_path,
            debug_dir,
        }
    }

    /// Overwrites the upload and the "original" debug copy with `bytes`.
    pub fn store_upload(&self, bytes: &[u8]) -> AppResult<String> {
        if let Some(parent) = self.upload_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&self.debug_dir)?;

        fs::write(&self.upload_path, bytes)?;
        fs::write(self.debug_dir.join(constants::ORIGINAL_IMAGE), bytes)?;
        info!("Stored upload ({} bytes) at {:?}", bytes.len(), self.upload_path);

        Ok(Self::debug_url(constants::ORIGINAL_IMAGE))
    }

    pub fn load_upload(&self) -> AppResult<DynamicImage> {
        if !self.upload_path.exists() {
            return Err(AppError::NotFound("No image uploaded yet".to_string()));
        }
        image::open(&self.upload_path)
            .map_err(|e| AppError::BadRequest(format!("Uploaded file is not a readable image: {}", e)))
    }

    /// Writes `image` into the debug directory and returns its URL.
    pub fn save_debug_image(&self, name: &str, image: &RgbImage) -> AppResult<String> {
        fs::create_dir_all(&self.debug_dir)?;
        let path = self.debug_dir.join(name);
        image.save(&path)?;
        debug!("Wrote debug image {:?}", path);
        Ok(Self::debug_url(name))
    }

    /// Removes `book_*` files left over from an earlier run.
    pub fn clear_book_crops(&self) -> AppResult<usize> {
        if !self.debug_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in WalkDir::new(&self.debug_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_book_file = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(constants::BOOK_FILE_PREFIX));
            if !is_book_file {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale crop {:?}: {}", path, e),
            }
        }
        Ok(removed)
    }

    /// Resolves a debug file name. Only plain file names are accepted.
    pub fn resolve_debug_file(&self, filename: &str) -> Option<PathBuf> {
        let is_plain = !filename.is_empty()
            && Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename)
            && filename != ".."
            && !filename.contains(['/', '\\']);
        if !is_plain {
            return None;
        }
        let path = self.debug_dir.join(filename);
        path.is_file().then_some(path)
    }

    pub fn debug_url(name: &str) -> String {
        format!("{}/{}", DEBUG_ROUTE, name)
    }
}

pub fn book_crop_name(index: usize) -> String {
    constants::BOOK_CROP_PATTERN.replace("{index}", &index.to_string())
}

pub fn book_ocr_name(index: usize) -> String {
    constants::BOOK_OCR_PATTERN.replace("{index}", &index.to_string())
}
