use image::DynamicImage;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::constants;
use crate::error::{AppError, AppResult};
use crate::models::{
    sort_reading_order, BookRecord, DetectOcrResponse, DetectResponse, Detection,
    DetectionParams, DetectionSummary, OcrSummary, TextDetection,
};
use crate::services::detector::BookDetector;
use crate::services::file::{book_crop_name, book_ocr_name, FileService};
use crate::services::imaging;
use crate::services::ocr::TextRecognizer;
use crate::utils::{round_to, to_percent};

/// Upload → detection → per-book OCR, writing debug images as it goes.
///
/// Every method is synchronous and CPU bound; handlers call it from
/// `web::block`.
#[derive(Clone)]
pub struct Pipeline {
    detector: Arc<dyn BookDetector>,
    recognizer: Arc<dyn TextRecognizer>,
    files: FileService,
}

struct DetectionRun {
    image: DynamicImage,
    detections: Vec<Detection>,
    original_image: String,
    annotated_image: String,
}

impl Pipeline {
    pub fn new(
        detector: Arc<dyn BookDetector>,
        recognizer: Arc<dyn TextRecognizer>,
        files: FileService,
    ) -> Self {
        Self {
            detector,
            recognizer,
            files,
        }
    }

    pub fn files(&self) -> &FileService {
        &self.files
    }

    fn run_detection(&self, params: DetectionParams) -> AppResult<DetectionRun> {
        let image = self.files.load_upload()?;
        let mut detections = self
            .detector
            .detect(&image, params)
            .map_err(|e| AppError::Detection(e.to_string()))?;
        sort_reading_order(&mut detections);
        info!(
            "{} found {} books (conf={}, iou={})",
            self.detector.name(),
            detections.len(),
            params.conf,
            params.iou
        );

        let annotated = imaging::draw_detections(&image, &detections);
        let annotated_image = self
            .files
            .save_debug_image(constants::ANNOTATED_IMAGE, &annotated)?;

        Ok(DetectionRun {
            image,
            detections,
            original_image: FileService::debug_url(constants::ORIGINAL_IMAGE),
            annotated_image,
        })
    }

    pub fn detect(&self, params: DetectionParams) -> AppResult<DetectResponse> {
        let run = self.run_detection(params)?;
        let detections = run
            .detections
            .iter()
            .map(|d| DetectionSummary {
                bbox: d.bbox.as_array(),
                class_name: d.class_name.clone(),
                confidence: round_to(d.confidence, 3),
            })
            .collect::<Vec<_>>();

        Ok(DetectResponse {
            num_books: detections.len(),
            original_image: run.original_image,
            annotated_image: run.annotated_image,
            detections,
        })
    }

    pub fn detect_and_ocr(&self, params: DetectionParams) -> AppResult<DetectOcrResponse> {
        let run = self.run_detection(params)?;

        let removed = self.files.clear_book_crops()?;
        if removed > 0 {
            debug!("Removed {} stale book images", removed);
        }

        let mut books = Vec::with_capacity(run.detections.len());
        for (index, detection) in run.detections.iter().enumerate() {
            books.push(self.read_book(&run.image, index, detection)?);
        }

        Ok(DetectOcrResponse {
            num_books: books.len(),
            original_image: run.original_image,
            annotated_image: run.annotated_image,
            books,
        })
    }

    fn read_book(
        &self,
        image: &DynamicImage,
        index: usize,
        detection: &Detection,
    ) -> AppResult<BookRecord> {
        let crop = imaging::crop(image, &detection.bbox).ok_or_else(|| {
            AppError::Detection(format!("Book {} has an empty bounding box", index))
        })?;
        let crop_image = self.files.save_debug_image(&book_crop_name(index), &crop.to_rgb8())?;

        let enhanced = imaging::enhance_for_ocr(&crop);
        let raw = self
            .recognizer
            .recognize(&enhanced)
            .map_err(|e| AppError::Ocr(format!("book {}: {}", index, e)))?;
        let summary = OcrSummary::from_results(raw);
        if summary.results.is_empty() {
            warn!("No text recognized on book {}", index);
        } else {
            debug!(
                "Book {}: {:?} ({} fragments, {})",
                index,
                summary.text,
                summary.results.len(),
                summary.quality.as_str()
            );
        }

        let overlay = imaging::draw_text_quads(&crop, &summary.results);
        let crop_image_annotated = self.files.save_debug_image(&book_ocr_name(index), &overlay)?;

        let text_detections = summary
            .results
            .iter()
            .map(|r| TextDetection {
                text: r.text.clone(),
                confidence: to_percent(r.confidence),
                bbox: r.quad.map(|(x, y)| [x, y]),
            })
            .collect::<Vec<_>>();

        Ok(BookRecord {
            book_id: index,
            bbox: detection.bbox.as_array(),
            class_name: detection.class_name.clone(),
            detection_confidence: round_to(detection.confidence, 3),
            crop_image,
            crop_image_annotated,
            text: summary.text,
            ocr_confidence: to_percent(summary.avg_confidence),
            ocr_quality: summary.quality,
            num_text_detections: text_detections.len(),
            text_detections,
        })
    }
}
