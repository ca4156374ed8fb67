use std::future::Future;

use image::GrayImage;
use serde::Serialize;

use crate::error::RecognitionError;

/// Engine configuration applied before a single recognition call
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecognitionSettings {
    pub character_whitelist: String,
    pub preserve_interword_spaces: bool,
}

impl RecognitionSettings {
    pub fn new(character_whitelist: impl Into<String>, preserve_interword_spaces: bool) -> Self {
        Self {
            character_whitelist: character_whitelist.into(),
            preserve_interword_spaces,
        }
    }
}

/// Text recognition engine - abstraction over OCR backends.
///
/// Each call configures the engine with `settings` and then recognizes
/// `image`; results are never cached.
pub trait TextRecognizer: Send + Sync {
    fn recognize(
        &self,
        image: &GrayImage,
        settings: &RecognitionSettings,
    ) -> impl Future<Output = Result<String, RecognitionError>> + Send;
}
