//! Text detection + recognition over a single book crop, using PaddleOCR
//! models exported to ONNX (DB text detector, CRNN/CTC recognizer).

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use log::{debug, info};
use ndarray::{Array3, Array4, ArrayView2, Axis};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;

use crate::config::OcrConfig;
use crate::models::OcrResult;

pub trait TextRecognizer: Send + Sync {
    /// Finds and reads every text region of `image`.
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<OcrResult>>;
    fn name(&self) -> &'static str;
}

const DET_LIMIT_SIDE: u32 = 960;
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const DET_THRESH: f32 = 0.3;
const DET_BOX_THRESH: f32 = 0.5;
const DET_UNCLIP_RATIO: f32 = 1.6;
const DET_MAX_CANDIDATES: usize = 1000;

const REC_HEIGHT: u32 = 48;
const REC_MAX_WIDTH: u32 = 1280;
// Regions this much taller than wide are read rotated (vertical spine text)
const VERTICAL_RATIO: f32 = 1.5;

pub struct PaddleOcrEngine {
    det_session: Mutex<Session>,
    rec_session: Mutex<Session>,
    characters: Vec<String>,
}

/// Text region in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub score: f32,
}

impl TextBox {
    fn quad(&self) -> [(i32, i32); 4] {
        let (x1, y1, x2, y2) = (self.x1 as i32, self.y1 as i32, self.x2 as i32, self.y2 as i32);
        [(x1, y1), (x2, y1), (x2, y2), (x1, y2)]
    }
}

impl PaddleOcrEngine {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        for path in [&config.det_model_path, &config.rec_model_path, &config.dict_path] {
            if !path.exists() {
                anyhow::bail!("OCR asset not found at {}", path.display());
            }
        }

        let det_session = load_session(&config.det_model_path, config.threads)?;
        let rec_session = load_session(&config.rec_model_path, config.threads)?;
        let characters = load_character_dict(&config.dict_path)?;

        info!(
            "Loaded OCR models {} / {} ({} symbols)",
            config.det_model_path.display(),
            config.rec_model_path.display(),
            characters.len()
        );

        Ok(Self {
            det_session: Mutex::new(det_session),
            rec_session: Mutex::new(rec_session),
            characters,
        })
    }

    fn detect_text(&self, image: &DynamicImage) -> Result<Vec<TextBox>> {
        let (width, height) = image.dimensions();
        let input = preprocess_detection(image)?;

        let prob_map = {
            let mut session = self
                .det_session
                .lock()
                .map_err(|_| anyhow::anyhow!("Text detector lock poisoned"))?;
            let input_ref = TensorRef::from_array_view(&input)?;
            let outputs = session
                .run(inputs![input_ref])
                .map_err(|e| anyhow::anyhow!("Text detection failed: {e}"))?;
            outputs[0]
                .try_extract_array::<f32>()?
                .into_owned()
                .into_dimensionality::<ndarray::Ix4>()?
        };

        let map = prob_map.index_axis(Axis(0), 0).index_axis(Axis(0), 0).to_owned();
        Ok(boxes_from_probability_map(map.view(), width, height))
    }

    fn read_region(&self, region: &DynamicImage) -> Result<(String, f32)> {
        let input = preprocess_recognition(region);

        let preds = {
            let mut session = self
                .rec_session
                .lock()
                .map_err(|_| anyhow::anyhow!("Text recognizer lock poisoned"))?;
            let input_ref = TensorRef::from_array_view(&input)?;
            let outputs = session
                .run(inputs![input_ref])
                .map_err(|e| anyhow::anyhow!("Text recognition failed: {e}"))?;
            outputs[0]
                .try_extract_array::<f32>()?
                .into_owned()
                .into_dimensionality::<ndarray::Ix3>()?
        };

        Ok(ctc_decode(preds.index_axis(Axis(0), 0), &self.characters))
    }
}

impl TextRecognizer for PaddleOcrEngine {
    fn recognize(&self, image: &DynamicImage) -> Result<Vec<OcrResult>> {
        let boxes = self.detect_text(image)?;
        debug!("Text detector found {} regions", boxes.len());

        let mut results = Vec::with_capacity(boxes.len());
        for text_box in boxes {
            let mut region = image.crop_imm(
                text_box.x1,
                text_box.y1,
                text_box.x2 - text_box.x1,
                text_box.y2 - text_box.y1,
            );
            let (w, h) = region.dimensions();
            if h as f32 >= w as f32 * VERTICAL_RATIO {
                region = region.rotate270();
            }

            let (text, confidence) = self.read_region(&region)?;
            if text.trim().is_empty() {
                continue;
            }
            results.push(OcrResult {
                text,
                confidence,
                quad: text_box.quad(),
            });
        }

        Ok(results)
    }

    fn name(&self) -> &'static str {
        "paddleocr-onnx"
    }
}

fn load_session(path: &Path, threads: usize) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level1)?
        .with_intra_threads(threads)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load OCR model {}", path.display()))
}

/// Blank token first, dictionary symbols, then a trailing space token.
fn load_character_dict(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open character dictionary {}", path.display()))?;

    let mut characters = vec!["blank".to_string()];
    for line in BufReader::new(file).lines() {
        let line = line?;
        let symbol = line.trim_end_matches(['\r', '\n']);
        if !symbol.is_empty() {
            characters.push(symbol.to_string());
        }
    }
    characters.push(" ".to_string());
    Ok(characters)
}

fn preprocess_detection(image: &DynamicImage) -> Result<Array4<f32>> {
    let (width, height) = image.dimensions();
    let longest = width.max(height) as f32;
    let ratio = if longest > DET_LIMIT_SIDE as f32 {
        DET_LIMIT_SIDE as f32 / longest
    } else {
        1.0
    };

    let round32 = |v: f32| (((v * ratio) / 32.0).round() as u32 * 32).max(32);
    let (resize_w, resize_h) = (round32(width as f32), round32(height as f32));
    if width == 0 || height == 0 {
        anyhow::bail!("Empty image {}x{}", width, height);
    }

    let rgb = image
        .resize_exact(resize_w, resize_h, image::imageops::FilterType::CatmullRom)
        .to_rgb8();

    let mut array = Array4::<f32>::zeros((1, 3, resize_h as usize, resize_w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] =
                (f32::from(pixel[c]) / 255.0 - DET_MEAN[c]) / DET_STD[c];
        }
    }
    Ok(array)
}

fn preprocess_recognition(region: &DynamicImage) -> Array4<f32> {
    let (w, h) = region.dimensions();
    let ratio = w.max(1) as f32 / h.max(1) as f32;
    let resized_w = ((REC_HEIGHT as f32 * ratio).ceil() as u32).clamp(1, REC_MAX_WIDTH);

    let rgb = region
        .resize_exact(resized_w, REC_HEIGHT, image::imageops::FilterType::CatmullRom)
        .to_rgb8();

    let mut array = Array3::<f32>::zeros((3, REC_HEIGHT as usize, resized_w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            array[[c, y as usize, x as usize]] = (f32::from(pixel[c]) / 255.0 - 0.5) / 0.5;
        }
    }
    array.insert_axis(Axis(0))
}

/// DB post-processing: threshold, dilate, trace outer contours, score each
/// bounding rectangle against the map, expand it and scale it back to the
/// source image. Boxes come back in reading order.
pub fn boxes_from_probability_map(map: ArrayView2<f32>, src_w: u32, src_h: u32) -> Vec<TextBox> {
    let (map_h, map_w) = (map.shape()[0], map.shape()[1]);
    if map_h == 0 || map_w == 0 || src_w == 0 || src_h == 0 {
        return Vec::new();
    }

    let mut mask = GrayImage::new(map_w as u32, map_h as u32);
    for ((y, x), &p) in map.indexed_iter() {
        if p > DET_THRESH {
            mask.put_pixel(x as u32, y as u32, Luma([255u8]));
        }
    }
    let mask = dilate(&mask, Norm::LInf, 1);

    let mut boxes = Vec::new();
    for contour in find_contours::<u32>(&mask)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .take(DET_MAX_CANDIDATES)
    {
        let Some(min_x) = contour.points.iter().map(|p| p.x).min() else {
            continue;
        };
        let max_x = contour.points.iter().map(|p| p.x).max().unwrap_or(min_x);
        let min_y = contour.points.iter().map(|p| p.y).min().unwrap_or(0);
        let max_y = contour.points.iter().map(|p| p.y).max().unwrap_or(min_y);

        let (w, h) = ((max_x - min_x) as f32, (max_y - min_y) as f32);
        if w.min(h) < 3.0 {
            continue;
        }

        let score = mean_score(&map, min_x as usize, min_y as usize, max_x as usize, max_y as usize);
        if score < DET_BOX_THRESH {
            continue;
        }

        // Offset distance used by the DB "unclip" step, applied to a rectangle
        let distance = (w * h) * DET_UNCLIP_RATIO / (2.0 * (w + h));
        let scale_x = src_w as f32 / map_w as f32;
        let scale_y = src_h as f32 / map_h as f32;
        let to_src_x = |v: f32| (v * scale_x).clamp(0.0, src_w as f32).round() as u32;
        let to_src_y = |v: f32| (v * scale_y).clamp(0.0, src_h as f32).round() as u32;

        let text_box = TextBox {
            x1: to_src_x(min_x as f32 - distance),
            y1: to_src_y(min_y as f32 - distance),
            x2: to_src_x(max_x as f32 + distance),
            y2: to_src_y(max_y as f32 + distance),
            score,
        };
        if text_box.x2 - text_box.x1 <= 3 || text_box.y2 - text_box.y1 <= 3 {
            continue;
        }
        boxes.push(text_box);
    }

    sort_reading_order(&mut boxes);
    boxes
}

fn mean_score(map: &ArrayView2<f32>, x1: usize, y1: usize, x2: usize, y2: usize) -> f32 {
    let (h, w) = (map.shape()[0], map.shape()[1]);
    let (x2, y2) = (x2.min(w - 1), y2.min(h - 1));
    let region = map.slice(ndarray::s![y1..=y2, x1..=x2]);
    region.mean().unwrap_or(0.0)
}

/// Top-to-bottom, with boxes on roughly the same line ordered left to right.
fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| a.y1.cmp(&b.y1).then(a.x1.cmp(&b.x1)));
    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0 && boxes[j].y1.abs_diff(boxes[j - 1].y1) < 10 && boxes[j].x1 < boxes[j - 1].x1 {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Greedy CTC decoding: argmax per step, collapse repeats, drop blanks.
/// Confidence is the mean probability of the kept steps.
pub fn ctc_decode(preds: ArrayView2<f32>, characters: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut probs = Vec::new();
    let mut previous = None;

    for row in preds.rows() {
        let (index, prob) = row
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        if index != 0 && previous != Some(index) {
            if let Some(symbol) = characters.get(index) {
                text.push_str(symbol);
                probs.push(prob);
            }
        }
        previous = Some(index);
    }

    let confidence = if probs.is_empty() {
        0.0
    } else {
        probs.iter().sum::<f32>() / probs.len() as f32
    };
    (text, confidence)
}
