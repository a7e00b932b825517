//! Scene catalog: human-readable backdrop choices mapped to prompt text

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};

/// One selectable backdrop scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Stable identifier used on the command line, e.g. `marble`
    pub key: String,
    /// Label shown to people choosing a scene
    pub label: String,
    /// Text appended after the product description
    pub prompt_suffix: String,
}

impl Scene {
    #[must_use]
    pub fn new(key: &str, label: &str, prompt_suffix: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            prompt_suffix: prompt_suffix.to_string(),
        }
    }
}

/// Ordered list of scenes; order is the presentation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneCatalog {
    scenes: Vec<Scene>,
}

impl Default for SceneCatalog {
    fn default() -> Self {
        Self::new(vec![
            Scene::new(
                "marble",
                "Minimalist marble table (daylight)",
                "placed on a white carrara marble table, soft morning window light from left, luxury bright kitchen background, bokeh, 8k resolution, photorealistic, architectural digest style",
            ),
            Scene::new(
                "rustic-wood",
                "Rustic wooden console (low light)",
                "placed on a rustic dark oak wooden console, warm cozy lighting, cinematic shadows, blurred interior background, 8k resolution, photorealistic",
            ),
            Scene::new(
                "concrete-botanical",
                "Concrete floor & botanical (modern)",
                "placed on a grey concrete pedestal, minimalist architectural style, indoor green plant shadows, soft studio lighting, 8k, photorealistic",
            ),
            Scene::new(
                "infinity-white",
                "Pure white infinity backdrop (e-commerce)",
                "placed on a pure white seamless infinity curve studio background, professional product photography, soft ground shadow, commercial lighting, 8k",
            ),
        ])
    }
}

impl SceneCatalog {
    #[must_use]
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    #[must_use]
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Look a scene up by key or label, case-insensitively
    #[must_use]
    pub fn find(&self, key_or_label: &str) -> Option<&Scene> {
        let needle = key_or_label.trim();
        self.scenes.iter().find(|scene| {
            scene.key.eq_ignore_ascii_case(needle) || scene.label.eq_ignore_ascii_case(needle)
        })
    }

    /// Build the full generation prompt for `product_type` in `scene`
    ///
    /// # Errors
    /// - `InvalidConfig` when the scene is unknown or the product type is blank
    pub fn compose_prompt(&self, scene: &str, product_type: &str) -> Result<String> {
        let product_type = product_type.trim();
        if product_type.is_empty() {
            return Err(StudioError::invalid_config("product type must not be empty"));
        }
        let scene = self.find(scene).ok_or_else(|| {
            let known: Vec<&str> = self.scenes.iter().map(|s| s.key.as_str()).collect();
            StudioError::invalid_config(format!(
                "unknown scene '{}' (available: {})",
                scene,
                known.join(", ")
            ))
        })?;
        Ok(format!(
            "Professional product photography of a {}, {}",
            product_type, scene.prompt_suffix
        ))
    }

    /// # Errors
    /// - `InvalidConfig` for an empty catalog, blank or duplicate keys
    pub fn validate(&self) -> Result<()> {
        if self.scenes.is_empty() {
            return Err(StudioError::invalid_config("scene catalog is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for scene in &self.scenes {
            if scene.key.trim().is_empty() {
                return Err(StudioError::invalid_config("scene key must not be empty"));
            }
            if !seen.insert(scene.key.to_ascii_lowercase()) {
                return Err(StudioError::invalid_config(format!(
                    "duplicate scene key '{}'",
                    scene.key
                )));
            }
        }
        Ok(())
    }
}
