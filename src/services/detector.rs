//! Book spine detector backed by a YOLO model exported to ONNX.
//!
//! The model takes a letterboxed `[1, 3, S, S]` RGB tensor scaled to 0..1 and
//! returns `[1, 4 + classes, anchors]` rows of `cx, cy, w, h, scores...`.

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use log::{debug, info};
use ndarray::{Array4, ArrayViewD, Axis};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::Mutex;

use crate::config::DetectorConfig;
use crate::constants::MAX_DETECTIONS;
use crate::models::{BoundingBox, Detection, DetectionParams};

pub trait BookDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage, params: DetectionParams) -> Result<Vec<Detection>>;
    fn name(&self) -> &'static str;
}

pub struct YoloDetector {
    session: Mutex<Session>,
    input_size: u32,
    class_names: Vec<String>,
}

impl YoloDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        if !config.model_path.exists() {
            anyhow::bail!("Detector model not found at {}", config.model_path.display());
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.threads)?
            .commit_from_file(&config.model_path)
            .with_context(|| format!("Failed to load detector model {}", config.model_path.display()))?;

        info!(
            "Loaded detector {} (input {}px, classes {:?})",
            config.model_path.display(),
            config.input_size,
            config.class_names
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: config.input_size,
            class_names: config.class_names.clone(),
        })
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl BookDetector for YoloDetector {
    fn detect(&self, image: &DynamicImage, params: DetectionParams) -> Result<Vec<Detection>> {
        let (width, height) = image.dimensions();
        let letterbox = Letterbox::new(width, height, self.input_size);
        let input = letterbox.tensor(image);

        let candidates = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow::anyhow!("Detector session lock poisoned"))?;
            let input_ref = TensorRef::from_array_view(&input)?;
            let outputs = session
                .run(inputs![input_ref])
                .map_err(|e| anyhow::anyhow!("Detector inference failed: {e}"))?;
            let output = outputs[0].try_extract_array::<f32>()?;
            decode_predictions(output, params.conf)?
        };

        let kept = non_max_suppression(candidates, params.iou, MAX_DETECTIONS);
        debug!("Detector kept {} boxes (conf={}, iou={})", kept.len(), params.conf, params.iou);

        Ok(kept
            .into_iter()
            .filter_map(|c| {
                let bbox = letterbox.to_original(&c).clamp_to(width, height);
                (!bbox.is_empty()).then(|| Detection {
                    bbox,
                    class_id: c.class_id,
                    class_name: self.class_name(c.class_id),
                    confidence: c.score,
                })
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "yolo-onnx"
    }
}

/// Raw box in model input space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Candidate) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Resize-and-pad transform keeping the aspect ratio.
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
    pub resized_w: u32,
    pub resized_h: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let resized_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let resized_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            pad_x: (size - resized_w) as f32 / 2.0,
            pad_y: (size - resized_h) as f32 / 2.0,
            size,
            resized_w,
            resized_h,
        }
    }

    pub fn tensor(&self, image: &DynamicImage) -> Array4<f32> {
        let resized = image
            .resize_exact(self.resized_w, self.resized_h, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([114, 114, 114]));
        image::imageops::overlay(
            &mut canvas,
            &resized,
            self.pad_x.floor() as i64,
            self.pad_y.floor() as i64,
        );

        let size = self.size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                array[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
            }
        }
        array
    }

    pub fn to_original(&self, c: &Candidate) -> BoundingBox {
        let map_x = |v: f32| ((v - self.pad_x.floor()) / self.scale).round() as i32;
        let map_y = |v: f32| ((v - self.pad_y.floor()) / self.scale).round() as i32;
        BoundingBox::new(map_x(c.x1), map_y(c.y1), map_x(c.x2), map_y(c.y2))
    }
}

/// Turns the raw output into candidates above `conf`. Accepts both
/// `[1, 4 + nc, anchors]` and the transposed `[1, anchors, 4 + nc]` layouts.
pub fn decode_predictions(output: ArrayViewD<f32>, conf: f32) -> Result<Vec<Candidate>> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
        anyhow::bail!("Unexpected detector output shape {:?}", shape);
    }

    let rows = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<ndarray::Ix2>()?;
    let rows = if shape[1] > shape[2] { rows.reversed_axes() } else { rows };
    let (features, anchors) = (rows.shape()[0], rows.shape()[1]);
    if features < 5 {
        anyhow::bail!("Detector output has {} features, expected at least 5", features);
    }

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let (class_id, score) = (4..features)
            .map(|f| (f - 4, rows[[f, a]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < conf {
            continue;
        }

        let (cx, cy, w, h) = (rows[[0, a]], rows[[1, a]], rows[[2, a]], rows[[3, a]]);
        candidates.push(Candidate {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score,
            class_id,
        });
    }

    Ok(candidates)
}

/// Greedy per-class NMS, highest score first.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou: f32, max_det: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_det {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: usize) -> Candidate {
        Candidate { x1, y1, x2, y2, score, class_id }
    }

    #[test]
    fn test_iou() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        let b = cand(5.0, 0.0, 15.0, 10.0, 0.8, 0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&cand(20.0, 20.0, 30.0, 30.0, 0.5, 0)), 0.0);
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let kept = non_max_suppression(
            vec![
                cand(1.0, 0.0, 11.0, 10.0, 0.7, 0),
                cand(0.0, 0.0, 10.0, 10.0, 0.9, 0),
                cand(1.0, 0.0, 11.0, 10.0, 0.8, 1),
                cand(50.0, 0.0, 60.0, 10.0, 0.6, 0),
            ],
            0.5,
            10,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.6]);
    }

    #[test]
    fn test_nms_respects_max_detections() {
        let boxes = (0..5)
            .map(|i| cand(i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0, 0.9, 0))
            .collect();
        assert_eq!(non_max_suppression(boxes, 0.5, 3).len(), 3);
    }

    #[test]
    fn test_letterbox_round_trip_coordinates() {
        // 1280x640 -> scale 0.5, resized 640x320, padded 160px top/bottom
        let lb = Letterbox::new(1280, 640, 640);
        assert_eq!((lb.resized_w, lb.resized_h), (640, 320));
        assert_eq!(lb.pad_y, 160.0);
        let bbox = lb.to_original(&cand(100.0, 200.0, 150.0, 400.0, 0.9, 0));
        assert_eq!(bbox.as_array(), [200, 80, 300, 480]);
    }

    #[test]
    fn test_decode_filters_by_confidence() {
        // 6 anchors, 1 class: [1, 5, 6]
        let mut raw = Array3::<f32>::zeros((1, 5, 6));
        for (f, v) in [50.0, 60.0, 20.0, 40.0, 0.8].iter().enumerate() {
            raw[[0, f, 0]] = *v;
        }
        raw[[0, 4, 1]] = 0.3;
        let candidates = decode_predictions(raw.into_dyn().view(), 0.5).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0], cand(40.0, 40.0, 60.0, 80.0, 0.8, 0));
    }

    #[test]
    fn test_decode_transposed_layout() {
        // [1, anchors, 4 + nc] with 8 anchors, 1 class
        let mut raw = Array3::<f32>::zeros((1, 8, 5));
        for (f, v) in [50.0, 60.0, 20.0, 40.0, 0.9].iter().enumerate() {
            raw[[0, 3, f]] = *v;
        }
        let candidates = decode_predictions(raw.into_dyn().view(), 0.5).unwrap();
        assert_eq!(candidates, vec![cand(40.0, 40.0, 60.0, 80.0, 0.9, 0)]);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let raw = Array3::<f32>::zeros((2, 5, 6));
        assert!(decode_predictions(raw.into_dyn().view(), 0.5).is_err());
    }
}
