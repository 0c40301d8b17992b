// src/constants.rs

pub const DEFAULT_UPLOAD_PATH: &str = "uploaded.jpg";
pub const DEFAULT_DEBUG_DIR: &str = "debug_crops";
pub const DEFAULT_MODELS_DIR: &str = "./models";

// Route under which the debug directory is served
pub const DEBUG_ROUTE: &str = "/debug_crops";

// Debug image names
pub const ORIGINAL_IMAGE: &str = "original.jpg";
pub const ANNOTATED_IMAGE: &str = "annotated.jpg";
pub const BOOK_CROP_PATTERN: &str = "book_{index}.jpg";
pub const BOOK_OCR_PATTERN: &str = "book_{index}_ocr.jpg";
pub const BOOK_FILE_PREFIX: &str = "book_";

// Detection defaults
pub const DEFAULT_CONF: f32 = 0.6;
pub const DEFAULT_IOU: f32 = 0.5;
pub const DEFAULT_INPUT_SIZE: u32 = 640;
pub const MAX_DETECTIONS: usize = 300;

// OCR quality thresholds (average confidence, 0..1)
pub const QUALITY_EXCELLENT: f32 = 0.9;
pub const QUALITY_GOOD: f32 = 0.7;
pub const QUALITY_FAIR: f32 = 0.5;

// Google Books match acceptance (normalized similarity, 0..1)
pub const TITLE_MATCH_THRESHOLD: f64 = 0.6;

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
