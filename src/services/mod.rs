pub mod agent;
pub mod detector;
pub mod file;
pub mod google_books;
pub mod imaging;
pub mod ocr;
pub mod pipeline;
pub mod retry;

pub use agent::{AgentService, MetadataLookup, TitleResolver};
pub use detector::{BookDetector, YoloDetector};
pub use file::FileService;
pub use google_books::GoogleBooksClient;
pub use ocr::{PaddleOcrEngine, TextRecognizer};
pub use pipeline::Pipeline;
