//! SDXL inpainting adapter

use super::{clamp_param, clamp_steps, encode_inputs, BackendAdapter};
use crate::{
    error::Result,
    transport::ModelRef,
    types::{GenerationRequest, MaskPolarity},
};
use serde_json::{json, Value};

const DEFAULT_OWNER: &str = "stability-ai";
const DEFAULT_NAME: &str = "sdxl";
const DEFAULT_VERSION: &str = "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";

/// SDXL with mask (img2img inpainting)
///
/// Mask: white regenerates. Accepts `prompt_strength`, steps 1-500,
/// guidance 1-50.
#[derive(Debug, Clone)]
pub struct SdxlAdapter {
    model: ModelRef,
    polarity: MaskPolarity,
}

impl Default for SdxlAdapter {
    fn default() -> Self {
        Self::new(Self::default_model())
    }
}

impl SdxlAdapter {
    pub const NAME: &'static str = "sdxl";

    #[must_use]
    pub fn default_model() -> ModelRef {
        ModelRef::new(DEFAULT_OWNER, DEFAULT_NAME, Some(DEFAULT_VERSION))
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

impl BackendAdapter for SdxlAdapter {
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

        let mut input = json!({
            "prompt": request.prompt,
            "image": image,
            "mask": mask,
            "prompt_strength": clamp_param(Self::NAME, "prompt_strength", params.strength, 0.0, 1.0),
            "num_inference_steps": clamp_steps(Self::NAME, params.steps, 1, 500),
            "guidance_scale": clamp_param(Self::NAME, "guidance_scale", params.guidance_scale, 1.0, 50.0),
            "num_outputs": 1,
        });
        if let Some(negative) = request.negative_prompt.filter(|n| !n.trim().is_empty()) {
            input["negative_prompt"] = json!(negative);
        }
        Ok(input)
    }
}
