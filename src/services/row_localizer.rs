use std::collections::BTreeMap;

use image::{GrayImage, Luma, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, open};
use imageproc::region_labelling::{connected_components, Connectivity};
use rayon::prelude::*;

use crate::models::config::LocalizerConfig;
use crate::models::roi::BoundingBox;
use crate::services::ocr::preprocessing::rgb_to_hsv;

/// Bounding stats of one connected component of the row mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub label: u32,
    pub bbox: BoundingBox,
    /// Foreground pixel count
    pub area: u32,
}

/// Winning component and the full-width crop around it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowMatch {
    pub component: Component,
    pub score: f64,
    pub crop: BoundingBox,
}

/// Finds the highlighted "current player" row by color segmentation
#[derive(Debug, Clone, Default)]
pub struct RowLocalizer {
    config: LocalizerConfig,
}

impl RowLocalizer {
    pub fn new(config: LocalizerConfig) -> Self {
        Self { config }
    }

    /// Locate the owner's row. `None` when no component passes the filters.
    pub fn locate(&self, image: &RgbaImage) -> Option<RowMatch> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let mask = self.highlight_mask(image);
        let mask = self.merge_blobs(&mask);
        let components = find_components(&mask);

        let (component, score) = self.select(&components, width, height)?;
        let crop = self.expand(&component.bbox, width, height);

        Some(RowMatch {
            component,
            score,
            crop,
        })
    }

    /// HSV threshold on the highlight green (parallel over rows)
    pub fn highlight_mask(&self, image: &RgbaImage) -> GrayImage {
        let (width, height) = image.dimensions();
        let cfg = &self.config;

        let mask_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map(|y| {
                let mut row_data = Vec::with_capacity(width as usize);
                for x in 0..width {
                    let pixel = image.get_pixel(x, y);
                    let (h, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);

                    if h >= cfg.hue_min && h <= cfg.hue_max && s >= cfg.sat_min && v >= cfg.val_min {
                        row_data.push(255u8);
                    } else {
                        row_data.push(0u8);
                    }
                }
                row_data
            })
            .collect();

        GrayImage::from_raw(width, height, mask_data).unwrap_or_else(|| GrayImage::new(width, height))
    }

    /// Open to drop speckle, then dilate to fuse glyph fragments into one blob
    fn merge_blobs(&self, mask: &GrayImage) -> GrayImage {
        let opened = open(mask, Norm::LInf, self.config.open_radius);
        dilate(&opened, Norm::LInf, self.config.dilate_radius)
    }

    /// Filter and score candidates; ties keep the earliest label
    pub fn select(&self, components: &[Component], width: u32, height: u32) -> Option<(Component, f64)> {
        let cfg = &self.config;
        let scale = cfg.resolution_scale(height);

        let band_top = cfg.band_top * height as f64;
        let band_bottom = cfg.band_bottom * height as f64;
        let max_left = cfg.max_left_frac * width as f64;
        let min_area = cfg.min_area as f64 * scale * scale;
        let min_height = cfg.min_height as f64 * scale;
        let max_height = cfg.max_height as f64 * scale;
        let anchor = cfg.anchor_frac * height as f64;

        let mut best: Option<(Component, f64)> = None;

        for component in components {
            let bbox = &component.bbox;
            let y = bbox.y as f64;
            let h = bbox.height as f64;
            let aspect = bbox.width as f64 / h;

            let passes = y >= band_top
                && y <= band_bottom
                && (bbox.x as f64) < max_left
                && component.area as f64 >= min_area
                && h >= min_height
                && h <= max_height
                && aspect >= cfg.min_aspect
                && aspect <= cfg.max_aspect;
            if !passes {
                continue;
            }

            let score = component.area as f64 + cfg.width_weight * bbox.width as f64
                - cfg.y_penalty * (y - anchor).abs();

            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((*component, score));
            }
        }

        best
    }

    /// Full-width band around a row, clamped to the frame
    pub fn expand(&self, row: &BoundingBox, width: u32, height: u32) -> BoundingBox {
        let cfg = &self.config;

        let crop_height = ((cfg.crop_factor * row.height as f64).round() as u32)
            .clamp(cfg.crop_min, cfg.crop_max.max(cfg.crop_min))
            .min(height);

        let center = row.y as f64 + row.height as f64 / 2.0;
        let top = (center - cfg.above_bias * crop_height as f64).round() as i64;
        let top = top.clamp(0, (height - crop_height) as i64);

        BoundingBox::clamped(0, top, width, crop_height, width, height)
    }
}

/// Label 8-connected foreground regions and gather bounding stats, in label order
pub fn find_components(mask: &GrayImage) -> Vec<Component> {
    let labeled = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    // (min_x, min_y, max_x, max_y, count)
    let mut regions: BTreeMap<u32, (u32, u32, u32, u32, u32)> = BTreeMap::new();

    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue;
        }

        regions
            .entry(label_val)
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert((x, y, x, y, 1));
    }

    regions
        .into_iter()
        .map(|(label, (min_x, min_y, max_x, max_y, count))| Component {
            label,
            bbox: BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
            area: count,
        })
        .collect()
}
