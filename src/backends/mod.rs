//! Generative inpainting backends
//!
//! Every hosted model family accepts a slightly different input schema and
//! answers with a slightly different output shape. Each family gets one
//! [`BackendAdapter`] that translates the generic [`GenerationRequest`] into
//! its schema and the raw output back into an [`ImageReference`], so the
//! orchestrator never looks at model-specific keys.
//!
//! Families:
//! - [`SdxlAdapter`]: SDXL img2img with mask, supports `prompt_strength`
//! - [`StableDiffusionInpaintAdapter`]: classic SD inpainting, no strength
//! - [`FluxFillAdapter`]: FLUX fill, no negative prompt, different guidance scale

pub mod flux_fill;
pub mod sd_inpaint;
pub mod sdxl;

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;

pub use self::flux_fill::FluxFillAdapter;
pub use self::sd_inpaint::StableDiffusionInpaintAdapter;
pub use self::sdxl::SdxlAdapter;

use crate::{
    error::{BackendFailure, FailureKind, Result, StudioError},
    services::ImageIOService,
    transport::ModelRef,
    types::{GenerationRequest, ImageReference, MaskPolarity},
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Translates generic generation requests to one backend family's schema
pub trait BackendAdapter: Send + Sync {
    /// Candidate name used in logs and failure records
    fn name(&self) -> &str;

    /// Hosted model this adapter targets
    fn model(&self) -> &ModelRef;

    /// How this backend reads the mask it is sent
    fn mask_polarity(&self) -> MaskPolarity;

    /// Build the backend's input object
    ///
    /// # Errors
    /// - `InvalidConfig` when canvas and mask dimensions differ
    /// - `Image` when the canvas or mask cannot be encoded
    fn adapt(&self, request: &GenerationRequest<'_>) -> Result<Value>;

    /// Normalize the backend's raw output into one image reference
    fn parse_response(&self, output: &Value) -> std::result::Result<ImageReference, BackendFailure> {
        parse_image_reference(self.name(), output)
    }
}

/// Backend families the orchestrator knows how to adapt to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendFamily {
    Sdxl,
    SdInpainting,
    FluxFill,
}

impl BackendFamily {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sdxl => "sdxl",
            Self::SdInpainting => "sd-inpainting",
            Self::FluxFill => "flux-fill",
        }
    }

    /// Model used when a candidate does not name one
    #[must_use]
    pub fn default_model(&self) -> ModelRef {
        match self {
            Self::Sdxl => SdxlAdapter::default_model(),
            Self::SdInpainting => StableDiffusionInpaintAdapter::default_model(),
            Self::FluxFill => FluxFillAdapter::default_model(),
        }
    }

    /// Mask convention the family's hosted models document
    #[must_use]
    pub fn default_polarity(&self) -> MaskPolarity {
        match self {
            Self::Sdxl | Self::SdInpainting | Self::FluxFill => MaskPolarity::WhiteRegenerates,
        }
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendFamily {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sdxl" => Ok(Self::Sdxl),
            "sd-inpainting" | "stable-diffusion-inpainting" => Ok(Self::SdInpainting),
            "flux-fill" | "flux" => Ok(Self::FluxFill),
            other => Err(StudioError::invalid_config(format!(
                "unknown backend family '{}' (expected sdxl, sd-inpainting or flux-fill)",
                other
            ))),
        }
    }
}

/// One entry of the ordered candidate list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCandidate {
    pub family: BackendFamily,
    /// Overrides the family's default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    /// Overrides the family's documented mask convention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_polarity: Option<MaskPolarity>,
}

impl BackendCandidate {
    #[must_use]
    pub fn new(family: BackendFamily) -> Self {
        Self {
            family,
            model: None,
            mask_polarity: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_mask_polarity(mut self, polarity: MaskPolarity) -> Self {
        self.mask_polarity = Some(polarity);
        self
    }

    /// Build the adapter this candidate describes
    #[must_use]
    pub fn build_adapter(&self) -> Box<dyn BackendAdapter> {
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| self.family.default_model());
        let polarity = self
            .mask_polarity
            .unwrap_or_else(|| self.family.default_polarity());

        match self.family {
            BackendFamily::Sdxl => Box::new(SdxlAdapter::new(model).with_mask_polarity(polarity)),
            BackendFamily::SdInpainting => {
                Box::new(StableDiffusionInpaintAdapter::new(model).with_mask_polarity(polarity))
            },
            BackendFamily::FluxFill => {
                Box::new(FluxFillAdapter::new(model).with_mask_polarity(polarity))
            },
        }
    }
}

/// Candidate order used when none is configured: pinned SDXL first, then
/// FLUX fill, then classic SD inpainting as the most permissive last resort
#[must_use]
pub fn default_candidates() -> Vec<BackendCandidate> {
    vec![
        BackendCandidate::new(BackendFamily::Sdxl),
        BackendCandidate::new(BackendFamily::FluxFill),
        BackendCandidate::new(BackendFamily::SdInpainting),
    ]
}

/// Canvas and mask as data URIs, the mask rendered in `polarity`
pub(crate) fn encode_inputs(
    request: &GenerationRequest<'_>,
    polarity: MaskPolarity,
) -> Result<(String, String)> {
    if request.canvas.dimensions() != request.mask.dimensions() {
        let (cw, ch) = request.canvas.dimensions();
        let (mw, mh) = request.mask.dimensions();
        return Err(StudioError::invalid_config(format!(
            "{}: mask is {}x{} but canvas is {}x{}",
            request.backend, mw, mh, cw, ch
        )));
    }

    let image = ImageIOService::png_data_uri(&DynamicImage::ImageRgb8(
        request.canvas.pixels().clone(),
    ))?;
    let mask = ImageIOService::png_data_uri(&DynamicImage::ImageLuma8(
        request.mask.to_polarity(polarity),
    ))?;
    Ok((image, mask))
}

/// Clamp an integer parameter into a backend's accepted range
pub(crate) fn clamp_steps(backend: &str, steps: u32, min: u32, max: u32) -> u32 {
    let clamped = steps.clamp(min, max);
    if clamped != steps {
        log::debug!(
            "{}: steps {} outside {}-{}, using {}",
            backend,
            steps,
            min,
            max,
            clamped
        );
    }
    clamped
}

/// Clamp a float parameter into a backend's accepted range
pub(crate) fn clamp_param(backend: &str, parameter: &str, value: f32, min: f32, max: f32) -> f32 {
    let clamped = value.clamp(min, max);
    if (clamped - value).abs() > f32::EPSILON {
        log::debug!(
            "{}: {} {} outside {}-{}, using {}",
            backend,
            parameter,
            value,
            min,
            max,
            clamped
        );
    }
    clamped
}

/// Normalize a list, string or object output into one image reference
///
/// Lists yield their first non-empty entry; objects are searched for `url`,
/// `image` then `output`. Strings may be http(s) URLs or base64 data URIs.
pub fn parse_image_reference(
    backend: &str,
    output: &Value,
) -> std::result::Result<ImageReference, BackendFailure> {
    match output {
        Value::Null => Err(BackendFailure::new(
            backend,
            FailureKind::EmptyOutput,
            "backend returned no output",
        )),
        Value::String(text) => reference_from_str(backend, text),
        Value::Array(items) => {
            let first = items.iter().find(|item| match item {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            });
            match first {
                Some(item) => parse_image_reference(backend, item),
                None => Err(BackendFailure::new(
                    backend,
                    FailureKind::EmptyOutput,
                    "backend returned an empty output list",
                )),
            }
        },
        Value::Object(map) => {
            let nested = ["url", "image", "output"]
                .iter()
                .find_map(|key| map.get(*key));
            match nested {
                Some(value) => parse_image_reference(backend, value),
                None => Err(BackendFailure::new(
                    backend,
                    FailureKind::MalformedResponse,
                    format!(
                        "output object has none of url/image/output (keys: {})",
                        map.keys().cloned().collect::<Vec<_>>().join(", ")
                    ),
                )),
            }
        },
        other => Err(BackendFailure::new(
            backend,
            FailureKind::MalformedResponse,
            format!("unexpected output value: {}", other),
        )),
    }
}

fn reference_from_str(backend: &str, text: &str) -> std::result::Result<ImageReference, BackendFailure> {
    let text = text.trim();
    if text.is_empty() {
        return Err(BackendFailure::new(
            backend,
            FailureKind::EmptyOutput,
            "backend returned an empty string",
        ));
    }
    if text.starts_with("data:") {
        return ImageIOService::decode_data_uri(text)
            .filter(|bytes| !bytes.is_empty())
            .map(ImageReference::Bytes)
            .ok_or_else(|| {
                BackendFailure::new(
                    backend,
                    FailureKind::MalformedResponse,
                    "output data URI does not decode",
                )
            });
    }
    if text.starts_with("http://") || text.starts_with("https://") {
        return Ok(ImageReference::Url(text.to_string()));
    }
    Err(BackendFailure::new(
        backend,
        FailureKind::MalformedResponse,
        format!("output '{}' is neither a URL nor a data URI", text),
    ))
}
