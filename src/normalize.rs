//! Canvas normalization
//!
//! Turns an arbitrary-aspect upload into the fixed-size square canvas that both
//! segmentation and the generative backends consume. A single uniform scale
//! factor (`target_size / max(width, height)`) is applied to both axes, so the
//! subject is never stretched. The scaled source is then centered on a
//! `target_size` square of fill color. Memory stays bounded by the target size
//! however elongated the upload is.

use crate::{
    error::{Result, StudioError},
    types::{Canvas, SourceImage},
};
use image::{imageops::FilterType, ImageBuffer, Rgb};
use tracing::{debug, instrument};

/// Largest canvas side accepted by the normalizer
pub const MAX_TARGET_SIZE: u32 = 4096;

/// Canvas normalization settings
#[derive(Debug, Clone)]
pub struct CanvasNormalizer {
    /// Side length of the produced square canvas
    pub target_size: u32,
    /// Padding color (RGB)
    pub fill_color: [u8; 3],
    /// Resampling filter used when the source is scaled
    pub filter: FilterType,
}

impl Default for CanvasNormalizer {
    fn default() -> Self {
        Self {
            target_size: 1024,
            fill_color: [255, 255, 255], // White padding
            filter: FilterType::Lanczos3,
        }
    }
}

impl CanvasNormalizer {
    #[must_use]
    pub fn new(target_size: u32, fill_color: [u8; 3]) -> Self {
        Self {
            target_size,
            fill_color,
            ..Self::default()
        }
    }

    /// Scale `source` to fit `target_size` and center it on a square canvas
    ///
    /// # Errors
    /// - `InvalidConfig` when `target_size` is zero or above [`MAX_TARGET_SIZE`]
    /// - `InvalidImage` when the source has a zero dimension
    #[instrument(level = "debug", skip(self, source), fields(width = source.width(), height = source.height(), target = self.target_size))]
    pub fn normalize(&self, source: &SourceImage) -> Result<Canvas> {
        if self.target_size == 0 || self.target_size > MAX_TARGET_SIZE {
            return Err(StudioError::config_value_error(
                "target size",
                self.target_size,
                &format!("1-{}", MAX_TARGET_SIZE),
                Some(1024),
            ));
        }

        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(StudioError::invalid_image(format!(
                "cannot normalize a {}x{} image",
                width, height
            )));
        }

        let (scaled_width, scaled_height) = fitted_size(width, height, self.target_size);
        // Floor division: odd differences put the extra padding pixel after the subject
        let offset_x = (self.target_size - scaled_width) / 2;
        let offset_y = (self.target_size - scaled_height) / 2;

        let scaled = if (scaled_width, scaled_height) == (width, height) {
            debug!("Source already fits the target size, skipping resample");
            source.pixels().clone()
        } else {
            image::imageops::resize(source.pixels(), scaled_width, scaled_height, self.filter)
        };

        let mut canvas = ImageBuffer::from_pixel(
            self.target_size,
            self.target_size,
            Rgb(self.fill_color),
        );
        image::imageops::replace(&mut canvas, &scaled, i64::from(offset_x), i64::from(offset_y));

        let region = (offset_x, offset_y, scaled_width, scaled_height);
        debug!(
            scale = f64::from(self.target_size) / f64::from(width.max(height)),
            region_x = region.0,
            region_y = region.1,
            region_width = region.2,
            region_height = region.3,
            "Normalized canvas"
        );

        Ok(Canvas::new(canvas, region))
    }
}

/// Convenience wrapper: `normalize(source, targetSize, fillColor)`
pub fn normalize(source: &SourceImage, target_size: u32, fill_color: [u8; 3]) -> Result<Canvas> {
    CanvasNormalizer::new(target_size, fill_color).normalize(source)
}

/// Source size after uniform scaling so the longest side equals `target_size`
///
/// Each side is rounded to whole pixels and kept at least one pixel wide.
fn fitted_size(width: u32, height: u32, target_size: u32) -> (u32, u32) {
    let scale = f64::from(target_size) / f64::from(width.max(height));
    let fit = |v: u32| -> u32 {
        let scaled = (f64::from(v) * scale).round() as u32;
        scaled.clamp(1, target_size)
    };
    (fit(width), fit(height))
}
