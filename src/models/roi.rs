use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in source-image pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Create a new box from coordinates
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a box clamped to an image of `image_width` x `image_height`.
    ///
    /// The origin is pulled inside the image first, then the size is cut to
    /// whatever remains.
    pub fn clamped(x: i64, y: i64, width: u32, height: u32, image_width: u32, image_height: u32) -> Self {
        let x = x.clamp(0, image_width as i64) as u32;
        let y = y.clamp(0, image_height as i64) as u32;
        Self {
            x,
            y,
            width: width.min(image_width - x),
            height: height.min(image_height - y),
        }
    }

    /// Get the end coordinates (exclusive)
    pub fn x2(&self) -> u32 {
        self.x + self.width
    }

    pub fn y2(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check that the box lies entirely inside an image
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        self.x2() <= image_width && self.y2() <= image_height
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Sub-region of a frame as fractions of its width and height
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CropFraction {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl CropFraction {
    pub const FULL: CropFraction = CropFraction {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Resolve against a frame size. Never leaves the frame and never
    /// collapses below one pixel on a non-empty frame.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let x = ((self.x.clamp(0.0, 1.0) * frame_width as f64).round() as u32).min(frame_width.saturating_sub(1));
        let y = ((self.y.clamp(0.0, 1.0) * frame_height as f64).round() as u32).min(frame_height.saturating_sub(1));
        let w = ((self.w.max(0.0) * frame_width as f64).round() as u32)
            .clamp(1, (frame_width - x).max(1));
        let h = ((self.h.max(0.0) * frame_height as f64).round() as u32)
            .clamp(1, (frame_height - y).max(1));

        BoundingBox::new(x, y, w, h)
    }
}

/// One candidate of the recognition search: a crop paired with a threshold
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CropVariant {
    pub region: CropFraction,
    pub threshold: u8,
}
