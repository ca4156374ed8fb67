use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, RgbaImage};

use crate::models::config::PreprocessingConfig;
use crate::models::roi::CropFraction;

/// Which OCR pass an image is prepared for; selects the upscale factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscalePass {
    /// Result banner and stat line
    ResultText,
    /// Match identifier, smaller glyphs
    MatchId,
}

/// Region preprocessing for OCR: crop, upscale, luminance, threshold.
///
/// Pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct PreprocessingService {
    config: PreprocessingConfig,
}

impl PreprocessingService {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    pub fn scale_factor(&self, pass: UpscalePass) -> f64 {
        match pass {
            UpscalePass::ResultText => self.config.result_text_scale,
            UpscalePass::MatchId => self.config.match_id_scale,
        }
    }

    /// Full pipeline: crop → scale → luminance → threshold
    pub fn preprocess(
        &self,
        image: &RgbaImage,
        region: &CropFraction,
        threshold: u8,
        pass: UpscalePass,
    ) -> GrayImage {
        let cropped = self.crop(image, region);
        let scaled = self.scale(&cropped, self.scale_factor(pass));
        let gray = Self::to_luminance(&scaled);
        Self::binarize(&gray, threshold)
    }

    /// Crop to a fractional region of the frame
    pub fn crop(&self, image: &RgbaImage, region: &CropFraction) -> RgbaImage {
        let bbox = region.to_pixels(image.width(), image.height());
        imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image()
    }

    /// Scale image by factor, rounding the target size
    pub fn scale(&self, image: &RgbaImage, factor: f64) -> RgbaImage {
        let new_width = ((image.width() as f64 * factor).round() as u32).max(1);
        let new_height = ((image.height() as f64 * factor).round() as u32).max(1);

        imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
    }

    /// Luminance as `0.3R + 0.59G + 0.11B`
    pub fn to_luminance(image: &RgbaImage) -> GrayImage {
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            let p = image.get_pixel(x, y);
            let luma = 0.3 * p[0] as f32 + 0.59 * p[1] as f32 + 0.11 * p[2] as f32;
            Luma([luma.round().min(255.0) as u8])
        })
    }

    /// Pixels brighter than `threshold` become white, the rest black
    pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            if image.get_pixel(x, y)[0] > threshold {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }
}

/// Convert RGB to HSV, hue on the 0-179 scale
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };

    let h = if h < 0.0 { h + 360.0 } else { h };
    let h = (h / 2.0) as u8;

    let s = if max == 0.0 { 0.0 } else { delta / max };
    let s = (s * 255.0) as u8;

    let v = (max * 255.0) as u8;

    (h, s, v)
}
