use super::Segmenter;
use crate::{
    backends::parse_image_reference,
    error::{Result, StudioError},
    services::ImageIOService,
    transport::{ModelRef, PredictionTransport},
};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage, RgbaImage};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Background removal through a hosted model
///
/// Sends the canvas as a PNG data URI under `image` and expects the model to
/// answer with a PNG cutout (list, string or object output shapes are all
/// accepted).
pub struct ReplicateSegmenter {
    transport: Arc<dyn PredictionTransport>,
    model: ModelRef,
}

impl ReplicateSegmenter {
    #[must_use]
    pub fn new(transport: Arc<dyn PredictionTransport>, model: ModelRef) -> Self {
        Self { transport, model }
    }

    /// Unpinned; configure `owner/name:version` to pin a specific release
    #[must_use]
    pub fn default_model() -> ModelRef {
        ModelRef::new("cjwbw", "rembg", None)
    }

    #[must_use]
    pub fn model(&self) -> &ModelRef {
        &self.model
    }
}

#[async_trait]
impl Segmenter for ReplicateSegmenter {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn segment(&self, image: &RgbImage) -> Result<RgbaImage> {
        let data_uri = ImageIOService::png_data_uri(&DynamicImage::ImageRgb8(image.clone()))?;
        debug!(model = %self.model, "Running hosted background removal");

        let output = self
            .transport
            .run(&self.model, json!({ "image": data_uri }))
            .await
            .map_err(|failure| StudioError::segmentation(failure.to_string()))?;
        let reference = parse_image_reference(&self.model.to_string(), &output)
            .map_err(|failure| StudioError::segmentation(failure.to_string()))?;
        let bytes = self
            .transport
            .fetch(&reference)
            .await
            .map_err(|e| StudioError::segmentation(format!("failed to retrieve cutout: {}", e)))?;

        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| StudioError::segmentation(format!("cutout is not an image: {}", e)))?;
        Ok(decoded.to_rgba8())
    }
}
