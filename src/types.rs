//! Core types for studio composition operations

use crate::error::{Result, StudioError};
use crate::services::ImageIOService;
use image::{DynamicImage, GenericImageView, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Decoded upload, immutable once read
#[derive(Debug, Clone)]
pub struct SourceImage {
    pixels: RgbImage,
}

impl SourceImage {
    /// Wrap a decoded image, rejecting zero-sized input
    pub fn new(image: &DynamicImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(StudioError::invalid_image(format!(
                "source image has a zero dimension ({}x{})",
                width, height
            )));
        }
        Ok(Self {
            pixels: image.to_rgb8(),
        })
    }

    /// Decode an uploaded file's bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(StudioError::invalid_image("source image is empty"));
        }
        let image = ImageIOService::load_from_bytes(bytes)
            .map_err(|e| StudioError::invalid_image(format!("failed to decode upload: {}", e)))?;
        Self::new(&image)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Square, padded, 3-channel image handed to segmentation and generation
#[derive(Debug, Clone)]
pub struct Canvas {
    pixels: RgbImage,
    /// Where the source landed inside the canvas: (x, y, width, height)
    content_region: (u32, u32, u32, u32),
}

impl Canvas {
    pub(crate) fn new(pixels: RgbImage, content_region: (u32, u32, u32, u32)) -> Self {
        Self {
            pixels,
            content_region,
        }
    }

    /// Side length of the square canvas
    #[must_use]
    pub fn size(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Bounding box of the embedded source image after scaling
    #[must_use]
    pub fn content_region(&self) -> (u32, u32, u32, u32) {
        self.content_region
    }

    #[must_use]
    pub fn into_image(self) -> DynamicImage {
        DynamicImage::ImageRgb8(self.pixels)
    }
}

/// Per-pixel foreground confidence, 255 = fully foreground
#[derive(Debug, Clone)]
pub struct AlphaMask {
    pub data: GrayImage,
}

impl AlphaMask {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.data.dimensions()
    }
}

/// Convention a backend uses to read an inpainting mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskPolarity {
    /// 0 keeps the pixel, 255 marks it for regeneration
    WhiteRegenerates,
    /// 255 keeps the pixel, 0 marks it for regeneration
    BlackRegenerates,
}

impl Default for MaskPolarity {
    fn default() -> Self {
        Self::WhiteRegenerates
    }
}

/// Binary inpainting mask in canonical polarity: 0 = preserve, 255 = regenerate
#[derive(Debug, Clone)]
pub struct BinaryMask {
    data: GrayImage,
}

impl BinaryMask {
    /// Value marking pixels the backend must leave untouched
    pub const PRESERVE: u8 = 0;
    /// Value marking pixels the backend may repaint
    pub const REGENERATE: u8 = 255;

    pub(crate) fn new(data: GrayImage) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.data.dimensions()
    }

    #[must_use]
    pub fn data(&self) -> &GrayImage {
        &self.data
    }

    /// Value at (x, y), canonical polarity
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data.get_pixel(x, y).0[0]
    }

    /// Number of pixels marked for preservation
    #[must_use]
    pub fn preserved_pixels(&self) -> usize {
        self.data
            .as_raw()
            .iter()
            .filter(|&&v| v == Self::PRESERVE)
            .count()
    }

    /// Render the mask in the polarity a backend expects
    #[must_use]
    pub fn to_polarity(&self, polarity: MaskPolarity) -> GrayImage {
        match polarity {
            MaskPolarity::WhiteRegenerates => self.data.clone(),
            MaskPolarity::BlackRegenerates => {
                let mut inverted = self.data.clone();
                image::imageops::invert(&mut inverted);
                inverted
            },
        }
    }
}

/// Generic sampling parameters, adapted per backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Denoising steps, must be > 0
    pub steps: u32,
    /// Classifier-free guidance scale, must be >= 0
    pub guidance_scale: f32,
    /// How much of the masked region is repainted, in [0, 1]
    pub strength: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            steps: 40,
            guidance_scale: 7.5,
            strength: 0.95,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(StudioError::config_value_error("steps", 0, ">= 1", Some(40)));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(StudioError::config_value_error(
                "guidance scale",
                self.guidance_scale,
                ">= 0.0",
                Some(7.5),
            ));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(StudioError::config_value_error(
                "strength",
                self.strength,
                "0.0-1.0",
                Some(0.95),
            ));
        }
        Ok(())
    }
}

/// Everything one generation attempt needs, backend-agnostic
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    /// Candidate the request is addressed to
    pub backend: &'a str,
    pub canvas: &'a Canvas,
    pub mask: &'a BinaryMask,
    pub prompt: &'a str,
    pub negative_prompt: Option<&'a str>,
    pub params: SamplingParams,
}

/// Canonical handle on a generated image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Remote location of the result
    Url(String),
    /// Inline image bytes (decoded from a data URI)
    Bytes(Vec<u8>),
}

impl ImageReference {
    #[must_use]
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Bytes(_) => None,
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::Bytes(bytes) => write!(f, "<inline image, {} bytes>", bytes.len()),
        }
    }
}

/// Successful outcome of the candidate loop
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// The first image any candidate produced
    pub image: ImageReference,
    /// Name of the candidate that produced it
    pub backend: String,
    /// Failures of the candidates tried before it, in order
    pub failures: Vec<crate::error::BackendFailure>,
}

/// Wall-clock time spent in each composition stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub normalization_ms: u64,
    pub isolation_ms: u64,
    /// Zero when only the preparation stages ran
    pub generation_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Breakdown line for logs, e.g. `normalize 12ms, isolate 40ms, generate 0ms`
    #[must_use]
    pub fn breakdown(&self) -> String {
        format!(
            "normalize {}ms, isolate {}ms, generate {}ms",
            self.normalization_ms, self.isolation_ms, self.generation_ms
        )
    }
}
