use std::path::PathBuf;

use crate::constants;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_path: PathBuf,
    pub debug_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub default_conf: f32,
    pub default_iou: f32,
    pub agent: AgentConfig,
}

/// Book detector model settings
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub threads: usize,
}

/// Text detection + recognition model settings
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub det_model_path: PathBuf,
    pub rec_model_path: PathBuf,
    pub dict_path: PathBuf,
    pub threads: usize,
}

/// External collaborators used by the agent endpoint
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,
    pub google_books_api_key: Option<String>,
    pub google_books_url: String,
}

impl Default for Config {
    fn default() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_parse("PORT", 8000);
        let models_dir = PathBuf::from(
            std::env::var("MODELS_DIR").unwrap_or_else(|_| constants::DEFAULT_MODELS_DIR.to_string()),
        );
        let threads = env_parse("INFERENCE_THREADS", 4);

        Self {
            host,
            port,
            upload_path: env_path("UPLOAD_PATH", PathBuf::from(constants::DEFAULT_UPLOAD_PATH)),
            debug_dir: env_path("DEBUG_DIR", PathBuf::from(constants::DEFAULT_DEBUG_DIR)),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", constants::MAX_UPLOAD_BYTES),
            detector: DetectorConfig {
                model_path: env_path("DETECTOR_MODEL", models_dir.join("book_detector.onnx")),
                input_size: env_parse("DETECTOR_INPUT_SIZE", constants::DEFAULT_INPUT_SIZE),
                class_names: parse_class_names(
                    &std::env::var("DETECTOR_CLASSES").unwrap_or_else(|_| "book".to_string()),
                ),
                threads,
            },
            ocr: OcrConfig {
                det_model_path: env_path("OCR_DET_MODEL", models_dir.join("ocr_det.onnx")),
                rec_model_path: env_path("OCR_REC_MODEL", models_dir.join("ocr_rec.onnx")),
                dict_path: env_path("OCR_DICT", models_dir.join("ocr_keys.txt")),
                threads,
            },
            default_conf: env_parse("DEFAULT_CONF", constants::DEFAULT_CONF),
            default_iou: env_parse("DEFAULT_IOU", constants::DEFAULT_IOU),
            agent: AgentConfig {
                llm_api_key: non_empty_env("MISTRAL_API_KEY"),
                llm_api_url: std::env::var("LLM_API_URL")
                    .unwrap_or_else(|_| "https://api.mistral.ai/v1/chat/completions".to_string()),
                llm_model: std::env::var("LLM_MODEL")
                    .unwrap_or_else(|_| "mistral-small-latest".to_string()),
                google_books_api_key: non_empty_env("GOOGLE_BOOKS_API_KEY"),
                google_books_url: std::env::var("GOOGLE_BOOKS_URL")
                    .unwrap_or_else(|_| "https://www.googleapis.com/books/v1/volumes".to_string()),
            },
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config rooted in `dir`: upload path and debug directory live inside it.
    pub fn with_workspace(dir: &std::path::Path) -> Self {
        Self {
            upload_path: dir.join(constants::DEFAULT_UPLOAD_PATH),
            debug_dir: dir.join(constants::DEFAULT_DEBUG_DIR),
            ..Self::default()
        }
    }
}

/// Splits a comma separated class list, e.g. `"book,magazine"`.
pub fn parse_class_names(raw: &str) -> Vec<String> {
    let names: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        vec!["book".to_string()]
    } else {
        names
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
