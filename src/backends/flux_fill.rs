//! FLUX Fill adapter; the model regenerates the white side of the mask

use super::{clamp_param, clamp_steps, encode_inputs, BackendAdapter};
use crate::{
    error::Result,
    transport::ModelRef,
    types::{GenerationRequest, MaskPolarity},
};
use serde_json::{json, Value};

/// Generic guidance values are on the SD scale (~7.5); FLUX fill expects ~30
const GUIDANCE_FACTOR: f32 = 4.0;

/// FLUX.1 fill
///
/// Mask: white regenerates. No negative prompt and no strength; steps are
/// limited to 15-50 and guidance to 1.5-100.
#[derive(Debug, Clone)]
pub struct FluxFillAdapter {
    model: ModelRef,
    polarity: MaskPolarity,
}

impl Default for FluxFillAdapter {
    fn default() -> Self {
        Self::new(Self::default_model())
    }
}

impl FluxFillAdapter {
    pub const NAME: &'static str = "flux-fill";

    #[must_use]
    pub fn default_model() -> ModelRef {
        ModelRef::new("black-forest-labs", "flux-fill-dev", None)
    }

    #[must_use]
    pub fn new(model: ModelRef) -> Self {
        Self {
            model,
            polarity: MaskPolarity::WhiteRegenerates,
        }
    }

    #[must_use]
    pub fn with_mask_polarity(mut self, polarity: MaskPolarity) -> Self {
        self.polarity = polarity;
        self
    }
}

impl BackendAdapter for FluxFillAdapter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn model(&self) -> &ModelRef {
        &self.model
    }

    fn mask_polarity(&self) -> MaskPolarity {
        self.polarity
    }

    fn adapt(&self, request: &GenerationRequest<'_>) -> Result<Value> {
        let (image, mask) = encode_inputs(request, self.polarity)?;
        let params = request.params;

        if request.negative_prompt.is_some() {
            log::debug!("{}: negative prompt is not supported, dropping it", Self::NAME);
        }

        Ok(json!({
            "prompt": request.prompt,
            "image": image,
            "mask": mask,
            "steps": clamp_steps(Self::NAME, params.steps, 15, 50),
            "guidance": clamp_param(
                Self::NAME,
                "guidance",
                params.guidance_scale * GUIDANCE_FACTOR,
                1.5,
                100.0,
            ),
            "output_format": "png",
        }))
    }
}
