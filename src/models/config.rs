use serde::{Deserialize, Serialize};

use crate::models::roi::CropFraction;

/// Color segmentation and row scoring parameters for the row localizer.
///
/// Hue follows the 0-179 convention of `rgb_to_hsv`. Pixel limits are
/// given for a frame `reference_height` pixels tall and scaled to the
/// actual frame height.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalizerConfig {
    pub hue_min: u8,
    pub hue_max: u8,
    pub sat_min: u8,
    pub val_min: u8,
    pub open_radius: u8,
    pub dilate_radius: u8,
    /// Allowed top edge of a row, as fractions of frame height
    pub band_top: f64,
    pub band_bottom: f64,
    /// Rows must start left of this fraction of frame width
    pub max_left_frac: f64,
    pub min_area: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub reference_height: u32,
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub width_weight: f64,
    pub y_penalty: f64,
    pub anchor_frac: f64,
    pub crop_factor: f64,
    pub crop_min: u32,
    pub crop_max: u32,
    /// Share of the crop placed above the row center
    pub above_bias: f64,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            hue_min: 35,
            hue_max: 85,
            sat_min: 40,
            val_min: 60,
            open_radius: 1,
            dilate_radius: 2,
            band_top: 0.22,
            band_bottom: 0.80,
            max_left_frac: 0.55,
            min_area: 300,
            min_height: 8,
            max_height: 40,
            reference_height: 1080,
            min_aspect: 1.2,
            max_aspect: 12.0,
            width_weight: 2.0,
            y_penalty: 0.1,
            anchor_frac: 0.4,
            crop_factor: 3.0,
            crop_min: 32,
            crop_max: 90,
            above_bias: 0.45,
        }
    }
}

impl LocalizerConfig {
    /// Frame height relative to the reference height
    pub fn resolution_scale(&self, frame_height: u32) -> f64 {
        if self.reference_height == 0 {
            return 1.0;
        }
        frame_height as f64 / self.reference_height as f64
    }
}

/// Candidate crops and thresholds for every OCR pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegionConfig {
    /// Result banner regions, tightest first
    pub result_regions: Vec<CropFraction>,
    pub result_thresholds: Vec<u8>,
    pub match_id_regions: Vec<CropFraction>,
    pub match_id_thresholds: Vec<u8>,
    /// Whole-frame stat regions used when no row was located
    pub stat_regions: Vec<CropFraction>,
    pub row_thresholds: Vec<u8>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            result_regions: vec![
                CropFraction::new(0.30, 0.02, 0.40, 0.12),
                CropFraction::new(0.25, 0.0, 0.50, 0.18),
                CropFraction::new(0.15, 0.0, 0.70, 0.25),
                CropFraction::new(0.0, 0.0, 1.0, 0.35),
            ],
            result_thresholds: vec![160, 128, 200],
            match_id_regions: vec![
                CropFraction::new(0.0, 0.88, 0.45, 0.12),
                CropFraction::new(0.60, 0.0, 0.40, 0.10),
            ],
            match_id_thresholds: vec![150, 110],
            stat_regions: vec![CropFraction::new(0.0, 0.22, 1.0, 0.58)],
            row_thresholds: vec![150, 120, 180],
        }
    }
}

/// Upscale factors per OCR pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub result_text_scale: f64,
    pub match_id_scale: f64,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            result_text_scale: 2.0,
            match_id_scale: 2.4,
        }
    }
}

const UPPERCASE_LATIN: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ACCENTED: &str = "ÀÁÂÃÄÅÆÇÈÉÊËÌÍÎÏÑÒÓÔÕÖØÙÚÛÜÝßŒ";
const CYRILLIC: &str = "АБВГДЕЁЖЗИЙКЛМНОПРСТУФХЦЧШЩЪЫЬЭЮЯ";

/// OCR server connection and per-pass character whitelists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Includes accented and Cyrillic capitals so a localized banner is
    /// read as itself rather than forced onto Latin lookalikes. Only
    /// VICTORY/DEFEAT parse; anything else goes to manual resolution.
    pub banner_whitelist: String,
    pub stat_whitelist: String,
    pub match_id_whitelist: String,
    pub preserve_interword_spaces: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:39835".to_string(),
            timeout_ms: 10_000,
            banner_whitelist: format!("{}{}{}", UPPERCASE_LATIN, ACCENTED, CYRILLIC),
            stat_whitelist: format!(
                "{}abcdefghijklmnopqrstuvwxyz0123456789/%.,_- ",
                UPPERCASE_LATIN
            ),
            match_id_whitelist: format!(
                "{}abcdefghijklmnopqrstuvwxyz0123456789: ",
                UPPERCASE_LATIN
            ),
            preserve_interword_spaces: true,
        }
    }
}

/// Row localization worker bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub init_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 15_000,
            response_timeout_ms: 10_000,
        }
    }
}

/// Request cache freshness and failure cooldowns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub profile_ttl_ms: u64,
    pub rate_limited_cooldown_ms: u64,
    pub server_error_cooldown_ms: u64,
    pub other_cooldown_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            profile_ttl_ms: 300_000,
            rate_limited_cooldown_ms: 8_000,
            server_error_cooldown_ms: 3_000,
            other_cooldown_ms: 1_500,
        }
    }
}

/// Player directory service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 5_000,
        }
    }
}

/// Complete recognizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecognizerConfig {
    #[serde(default)]
    pub localizer: LocalizerConfig,
    #[serde(default)]
    pub regions: RegionConfig,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}
