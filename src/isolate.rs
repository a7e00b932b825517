//! Subject isolation and mask building
//!
//! Runs the pluggable [`Segmenter`] over the canvas and turns its alpha
//! channel into the canonical [`BinaryMask`]:
//!
//! | segmenter alpha        | meaning    | mask value            |
//! |------------------------|------------|-----------------------|
//! | `>= foreground_threshold` | subject | 0 (preserve)          |
//! | `<  foreground_threshold` | backdrop | 255 (regenerate)     |
//!
//! Backends that read masks the other way round get an inverted copy from
//! [`BinaryMask::to_polarity`] at adapter level; the mask built here never
//! changes convention.

use crate::{
    error::{Result, StudioError},
    segmentation::Segmenter,
    types::{AlphaMask, BinaryMask, Canvas},
};
use image::{GrayImage, Luma};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Default alpha cut between subject and backdrop
pub const DEFAULT_FOREGROUND_THRESHOLD: u8 = 128;

/// Separates the product from its backdrop on a normalized canvas
#[derive(Clone)]
pub struct SubjectIsolator {
    segmenter: Arc<dyn Segmenter>,
    foreground_threshold: u8,
}

impl std::fmt::Debug for SubjectIsolator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectIsolator")
            .field("segmenter", &self.segmenter.name())
            .field("foreground_threshold", &self.foreground_threshold)
            .finish()
    }
}

impl SubjectIsolator {
    #[must_use]
    pub fn new(segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            segmenter,
            foreground_threshold: DEFAULT_FOREGROUND_THRESHOLD,
        }
    }

    /// Alpha at or above `threshold` counts as subject; zero is rejected
    /// since it would preserve every pixel
    ///
    /// # Errors
    /// - `InvalidConfig` when `threshold` is zero
    pub fn with_threshold(mut self, threshold: u8) -> Result<Self> {
        if threshold == 0 {
            return Err(StudioError::config_value_error(
                "foreground threshold",
                threshold,
                "1-255",
                Some(DEFAULT_FOREGROUND_THRESHOLD),
            ));
        }
        self.foreground_threshold = threshold;
        Ok(self)
    }

    #[must_use]
    pub fn foreground_threshold(&self) -> u8 {
        self.foreground_threshold
    }

    #[must_use]
    pub fn segmenter_name(&self) -> &str {
        self.segmenter.name()
    }

    /// Segment `canvas` and derive its alpha and binary masks
    ///
    /// # Errors
    /// - `Segmentation` when the segmenter fails or its output does not match
    ///   the canvas dimensions
    #[instrument(level = "debug", skip(self, canvas), fields(segmenter = self.segmenter.name(), size = canvas.size()))]
    pub async fn isolate(&self, canvas: &Canvas) -> Result<(AlphaMask, BinaryMask)> {
        let segmented = self.segmenter.segment_canvas(canvas).await?;

        if segmented.dimensions() != canvas.dimensions() {
            let (sw, sh) = segmented.dimensions();
            let (cw, ch) = canvas.dimensions();
            return Err(StudioError::segmentation(format!(
                "segmenter '{}' returned {}x{} for a {}x{} canvas",
                self.segmenter.name(),
                sw,
                sh,
                cw,
                ch
            )));
        }

        let alpha = GrayImage::from_fn(segmented.width(), segmented.height(), |x, y| {
            Luma([segmented.get_pixel(x, y).0[3]])
        });
        let binary = binary_from_alpha(&alpha, self.foreground_threshold);

        debug!(
            preserved = binary.preserved_pixels(),
            total = alpha.len(),
            "Built inpainting mask"
        );
        Ok((AlphaMask { data: alpha }, binary))
    }
}

/// Threshold an alpha channel into the canonical preserve/regenerate mask
#[must_use]
pub fn binary_from_alpha(alpha: &GrayImage, threshold: u8) -> BinaryMask {
    let mut mask = alpha.clone();
    for pixel in mask.pixels_mut() {
        pixel.0[0] = if pixel.0[0] >= threshold {
            BinaryMask::PRESERVE
        } else {
            BinaryMask::REGENERATE
        };
    }
    BinaryMask::new(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{disc_alpha, solid_canvas, MockSegmenter};

    #[tokio::test]
    async fn test_disc_becomes_preserved_region() {
        let canvas = solid_canvas(1024, [240, 240, 240]);
        let alpha = disc_alpha(1024, (512, 512), 150);
        let isolator = SubjectIsolator::new(Arc::new(MockSegmenter::with_alpha(alpha)));

        let (alpha_mask, binary) = isolator.isolate(&canvas).await.unwrap();
        assert_eq!(alpha_mask.dimensions(), (1024, 1024));
        assert_eq!(binary.dimensions(), canvas.dimensions());

        // Center, and just inside the rim on each axis
        assert_eq!(binary.get(512, 512), 0);
        assert_eq!(binary.get(512 + 149, 512), 0);
        assert_eq!(binary.get(512, 512 - 149), 0);
        // Just outside the rim and far corners
        assert_eq!(binary.get(512 + 151, 512), 255);
        assert_eq!(binary.get(0, 0), 255);
        assert_eq!(binary.get(1023, 1023), 255);
    }

    #[test]
    fn test_threshold_boundary() {
        let mut alpha = GrayImage::new(4, 1);
        for (x, value) in [0u8, 127, 128, 255].iter().enumerate() {
            alpha.put_pixel(x as u32, 0, Luma([*value]));
        }
        let mask = binary_from_alpha(&alpha, 128);
        assert_eq!(mask.get(0, 0), 255);
        assert_eq!(mask.get(1, 0), 255);
        assert_eq!(mask.get(2, 0), 0);
        assert_eq!(mask.get(3, 0), 0);
    }

    #[test]
    fn test_confident_pixels_follow_polarity_for_any_threshold() {
        let alpha = GrayImage::from_fn(256, 1, |x, _| Luma([x as u8]));
        for threshold in [21u8, 64, 128, 200] {
            let mask = binary_from_alpha(&alpha, threshold);
            for x in 200..256 {
                assert_eq!(mask.get(x, 0), 0, "alpha {} threshold {}", x, threshold);
            }
            for x in 0..20 {
                assert_eq!(mask.get(x, 0), 255, "alpha {} threshold {}", x, threshold);
            }
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let canvas = solid_canvas(64, [255, 255, 255]);
        let isolator =
            SubjectIsolator::new(Arc::new(MockSegmenter::with_alpha(GrayImage::new(32, 64))));
        let err = isolator.isolate(&canvas).await.unwrap_err();
        assert!(matches!(err, StudioError::Segmentation(_)));
        assert!(err.to_string().contains("32x64"));
    }

    #[tokio::test]
    async fn test_segmenter_failure_propagates() {
        let canvas = solid_canvas(16, [255, 255, 255]);
        let isolator = SubjectIsolator::new(Arc::new(MockSegmenter::failing("model offline")));
        let err = isolator.isolate(&canvas).await.unwrap_err();
        assert!(matches!(err, StudioError::Segmentation(_)));
    }

    #[tokio::test]
    async fn test_canvas_is_not_mutated() {
        let canvas = solid_canvas(16, [1, 2, 3]);
        let before = canvas.pixels().clone();
        let isolator =
            SubjectIsolator::new(Arc::new(MockSegmenter::with_alpha(disc_alpha(16, (8, 8), 4))));
        isolator.isolate(&canvas).await.unwrap();
        assert_eq!(canvas.pixels(), &before);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let isolator = SubjectIsolator::new(Arc::new(MockSegmenter::failing("unused")));
        assert!(isolator.clone().with_threshold(0).is_err());
        assert_eq!(isolator.with_threshold(200).unwrap().foreground_threshold(), 200);
    }
}
