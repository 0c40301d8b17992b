pub mod detection;
pub mod ocr;

pub use detection::*;
pub use ocr::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ThresholdParams {
    pub conf: Option<f32>,
    pub iou: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub size: usize,
    pub original_image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub bbox: [i32; 4],
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub num_books: usize,
    pub original_image: String,
    pub annotated_image: String,
    pub detections: Vec<DetectionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextDetection {
    pub text: String,
    /// Percent, one decimal
    pub confidence: f32,
    pub bbox: [[i32; 2]; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct BookRecord {
    pub book_id: usize,
    pub bbox: [i32; 4],
    pub class_name: String,
    pub detection_confidence: f32,
    pub crop_image: String,
    pub crop_image_annotated: String,
    pub text: String,
    /// Percent, one decimal
    pub ocr_confidence: f32,
    pub ocr_quality: OcrQuality,
    pub num_text_detections: usize,
    pub text_detections: Vec<TextDetection>,
}

#[derive(Debug, Serialize)]
pub struct DetectOcrResponse {
    pub num_books: usize,
    pub original_image: String,
    pub annotated_image: String,
    pub books: Vec<BookRecord>,
}

/// Metadata of a Google Books volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoogleBooksInfo {
    pub title: String,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub categories: Vec<String>,
    pub average_rating: f32,
    pub ratings_count: u32,
    pub page_count: Option<u32>,
    pub info_link: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentBookRecord {
    #[serde(flatten)]
    pub book: BookRecord,
    pub resolved_title: Option<String>,
    pub resolved_author: Option<String>,
    /// 0 - 100
    pub agent_confidence: u8,
    pub agent_reasoning: Option<String>,
    pub google_books_found: bool,
    pub google_books_info: Option<GoogleBooksInfo>,
    pub google_books_verification: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetectOcrAgentResponse {
    pub num_books: usize,
    pub original_image: String,
    pub annotated_image: String,
    pub books: Vec<AgentBookRecord>,
}
