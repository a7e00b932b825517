//! Segmentation backends
//!
//! A segmenter takes the normalized canvas and returns the same pixels with an
//! alpha channel carrying per-pixel foreground confidence (255 = subject).
//! Implementations:
//! - [`BackdropKeySegmenter`]: local, keys out a plain backdrop connected to the canvas border
//! - [`HttpSegmenter`]: PNG in, PNG-with-alpha out against a background-removal service
//! - [`ReplicateSegmenter`]: runs a background-removal model through a [`PredictionTransport`]
//!
//! [`PredictionTransport`]: crate::transport::PredictionTransport

mod backdrop;
mod http;
mod replicate;

pub use backdrop::BackdropKeySegmenter;
pub use http::HttpSegmenter;
pub use replicate::ReplicateSegmenter;

use crate::{error::Result, types::Canvas};
use async_trait::async_trait;
use image::{RgbImage, RgbaImage};

/// Foreground/background separation capability
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Return `image` with an alpha channel of foreground confidence
    ///
    /// # Errors
    /// - `Segmentation` when the backend is unavailable or returns garbage
    async fn segment(&self, image: &RgbImage) -> Result<RgbaImage>;

    /// Segment a normalized canvas
    ///
    /// Defaults to [`Segmenter::segment`] on the canvas pixels. Segmenters
    /// that use the source placement (padding versus photo) override it.
    async fn segment_canvas(&self, canvas: &Canvas) -> Result<RgbaImage> {
        self.segment(canvas.pixels()).await
    }
}
