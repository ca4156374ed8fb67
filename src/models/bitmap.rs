use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Decoded RGBA frame. Immutable once created; clones share the pixels.
#[derive(Debug, Clone)]
pub struct RawImage {
    pixels: Arc<RgbaImage>,
}

impl RawImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copy the pixels into a message for the row worker
    pub fn to_payload(&self) -> ImagePayload {
        ImagePayload {
            width: self.width(),
            height: self.height(),
            pixel_bytes: self.pixels.as_raw().clone(),
        }
    }
}

impl From<RgbaImage> for RawImage {
    fn from(pixels: RgbaImage) -> Self {
        Self::new(pixels)
    }
}

/// Image as it crosses the worker boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePayload {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, 4 bytes per pixel
    pub pixel_bytes: Vec<u8>,
}

impl ImagePayload {
    /// Rebuild the frame, `None` if the byte count does not match the size
    pub fn into_rgba(self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixel_bytes)
    }
}
