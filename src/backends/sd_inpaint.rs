//! Stable Diffusion inpainting adapter, the last-resort candidate

use super::{clamp_param, clamp_steps, encode_inputs, BackendAdapter};
use crate::{
    error::Result,
    transport::ModelRef,
    types::{GenerationRequest, MaskPolarity},
};
use serde_json::{json, Value};

/// Classic Stable Diffusion inpainting
///
/// Mask: white regenerates. No strength parameter; guidance is capped at 20.
#[derive(Debug, Clone)]
pub struct StableDiffusionInpaintAdapter {
    model: ModelRef,
    polarity: MaskPolarity,
}

impl Default for StableDiffusionInpaintAdapter {
    fn default() -> Self {
        Self::new(Self::default_model())
    }
}

impl StableDiffusionInpaintAdapter {
    pub const NAME: &'static str = "sd-inpainting";

    /// Unpinned: runs whatever version the model's owner has promoted
    #[must_use]
    pub fn default_model() -> ModelRef {
        ModelRef::new("stability-ai", "stable-diffusion-inpainting", None)
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

impl BackendAdapter for StableDiffusionInpaintAdapter {
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
            "num_inference_steps": clamp_steps(Self::NAME, params.steps, 1, 500),
            "guidance_scale": clamp_param(Self::NAME, "guidance_scale", params.guidance_scale, 1.0, 20.0),
            "num_outputs": 1,
        });
        if let Some(negative) = request.negative_prompt.filter(|n| !n.trim().is_empty()) {
            input["negative_prompt"] = json!(negative);
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{center_square_mask, decode_data_uri_image, solid_canvas};
    use crate::types::SamplingParams;

    fn adapt_with(adapter: &StableDiffusionInpaintAdapter, params: SamplingParams) -> Value {
        let canvas = solid_canvas(12, [10, 20, 30]);
        let mask = center_square_mask(12, 4);
        adapter
            .adapt(&GenerationRequest {
                backend: "sd-inpainting",
                canvas: &canvas,
                mask: &mask,
                prompt: "a mug on oak",
                negative_prompt: Some("text, watermark"),
                params,
            })
            .unwrap()
    }

    #[test]
    fn test_schema_has_no_strength() {
        let input = adapt_with(&StableDiffusionInpaintAdapter::default(), SamplingParams::default());
        assert!(input.get("prompt_strength").is_none());
        assert!(input.get("strength").is_none());
        assert_eq!(input["negative_prompt"], "text, watermark");
        assert_eq!(input["num_inference_steps"], 40);
    }

    #[test]
    fn test_guidance_capped() {
        let params = SamplingParams {
            guidance_scale: 35.0,
            ..SamplingParams::default()
        };
        let input = adapt_with(&StableDiffusionInpaintAdapter::default(), params);
        assert!((input["guidance_scale"].as_f64().unwrap() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_mask_polarity_white_regenerates() {
        let input = adapt_with(&StableDiffusionInpaintAdapter::default(), SamplingParams::default());
        let sent = decode_data_uri_image(&input["mask"]).to_luma8();
        assert_eq!(sent.get_pixel(6, 6).0[0], 0);
        assert_eq!(sent.get_pixel(0, 11).0[0], 255);
    }

    #[test]
    fn test_polarity_override_inverts_mask() {
        let adapter = StableDiffusionInpaintAdapter::default()
            .with_mask_polarity(MaskPolarity::BlackRegenerates);
        let input = adapt_with(&adapter, SamplingParams::default());
        let sent = decode_data_uri_image(&input["mask"]).to_luma8();
        assert_eq!(sent.get_pixel(6, 6).0[0], 255);
        assert_eq!(sent.get_pixel(0, 11).0[0], 0);
    }

    #[test]
    fn test_default_model_is_unpinned() {
        assert!(StableDiffusionInpaintAdapter::default_model().version.is_none());
    }
}
