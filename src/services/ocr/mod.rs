pub mod engine;
pub mod http_ocr;
pub mod parser;
pub mod preprocessing;

// Re-export main types
pub use engine::{RecognitionSettings, TextRecognizer};
pub use http_ocr::HttpOcrClient;
pub use parser::{extract_match_id, parse_match_result, parse_stat_line};
pub use preprocessing::{PreprocessingService, UpscalePass};
