use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::engine::{RecognitionSettings, TextRecognizer};
use crate::error::RecognitionError;
use crate::models::config::OcrConfig;

/// HTTP OCR client for a local OCR server
///
/// The server holds one engine instance, so configure + recognize run as
/// one exclusive step.
pub struct HttpOcrClient {
    client: reqwest::Client,
    base_url: String,
    engine: Mutex<()>,
}

#[derive(Serialize)]
struct ImageRequest {
    image_base64: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
}

impl HttpOcrClient {
    /// Create a new HTTP OCR client
    pub fn new(config: &OcrConfig) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RecognitionError::Ocr(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            engine: Mutex::new(()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if server is healthy
    pub async fn health_check(&self) -> Result<(), RecognitionError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RecognitionError::Ocr(format!("Health check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RecognitionError::Ocr(format!(
                "Health check failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Encode image to base64 PNG
    fn encode_image(image: &GrayImage) -> Result<String, RecognitionError> {
        let mut buffer = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .map_err(|e| RecognitionError::Ocr(format!("Failed to encode image: {}", e)))?;
        Ok(general_purpose::STANDARD.encode(&buffer))
    }

    async fn configure(&self, settings: &RecognitionSettings) -> Result<(), RecognitionError> {
        let url = format!("{}/ocr/configure", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(settings)
            .send()
            .await
            .map_err(|e| RecognitionError::Ocr(format!("Configure request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RecognitionError::Ocr(format!("OCR configure error: {}", error_text)));
        }
        Ok(())
    }

    async fn recognize_text(&self, image_base64: String) -> Result<String, RecognitionError> {
        let url = format!("{}/ocr", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ImageRequest { image_base64 })
            .send()
            .await
            .map_err(|e| RecognitionError::Ocr(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RecognitionError::Ocr(format!("OCR server error: {}", error_text)));
        }

        let data: OcrResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Ocr(format!("Failed to parse response: {}", e)))?;

        Ok(data.text)
    }
}

impl TextRecognizer for HttpOcrClient {
    async fn recognize(
        &self,
        image: &GrayImage,
        settings: &RecognitionSettings,
    ) -> Result<String, RecognitionError> {
        let image_base64 = Self::encode_image(image)?;

        let _engine = self.engine.lock().await;
        self.configure(settings).await?;
        self.recognize_text(image_base64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_encode_image_is_decodable_png() {
        let img = GrayImage::from_fn(8, 4, |x, _| Luma([if x % 2 == 0 { 0 } else { 255 }]));

        let encoded = HttpOcrClient::encode_image(&img).unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_luma8();

        assert_eq!(decoded, img);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = OcrConfig {
            endpoint: "http://127.0.0.1:39835/".to_string(),
            ..OcrConfig::default()
        };
        let client = HttpOcrClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:39835");
    }

    #[test]
    fn test_settings_wire_format() {
        let settings = RecognitionSettings::new("ABC", true);
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["character_whitelist"], "ABC");
        assert_eq!(json["preserve_interword_spaces"], true);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_ocr_error() {
        let config = OcrConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout_ms: 500,
            ..OcrConfig::default()
        };
        let client = HttpOcrClient::new(&config).unwrap();
        let img = GrayImage::new(4, 4);

        let result = client
            .recognize(&img, &RecognitionSettings::new("A", false))
            .await;
        assert!(matches!(result, Err(RecognitionError::Ocr(_))));
    }
}
