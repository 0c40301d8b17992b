use serde::{Deserialize, Serialize};

use crate::constants::{QUALITY_EXCELLENT, QUALITY_FAIR, QUALITY_GOOD};
use crate::utils::{clean_fragment, title_case};

/// One piece of recognized text inside a crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Corners clockwise from top-left, in crop pixel coordinates
    pub quad: [(i32, i32); 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcrQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl OcrQuality {
    pub fn from_confidence(avg: f32) -> Self {
        if avg >= QUALITY_EXCELLENT {
            OcrQuality::Excellent
        } else if avg >= QUALITY_GOOD {
            OcrQuality::Good
        } else if avg >= QUALITY_FAIR {
            OcrQuality::Fair
        } else {
            OcrQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrQuality::Excellent => "Excellent",
            OcrQuality::Good => "Good",
            OcrQuality::Fair => "Fair",
            OcrQuality::Poor => "Poor",
        }
    }
}

/// Merged OCR output for one book crop.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrSummary {
    pub text: String,
    pub avg_confidence: f32,
    pub quality: OcrQuality,
    pub results: Vec<OcrResult>,
}

impl OcrSummary {
    /// Cleans every fragment, drops the empty ones, joins the rest with
    /// spaces and title-cases the result.
    pub fn from_results(raw: Vec<OcrResult>) -> Self {
        let results: Vec<OcrResult> = raw
            .into_iter()
            .filter_map(|r| {
                clean_fragment(&r.text).map(|text| OcrResult { text, ..r })
            })
            .collect();

        let joined = results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let avg_confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f32>() / results.len() as f32
        };

        Self {
            text: title_case(&joined),
            avg_confidence,
            quality: OcrQuality::from_confidence(avg_confidence),
            results,
        }
    }
}
