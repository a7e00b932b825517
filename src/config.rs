//! Configuration types for studio composition

use crate::{
    backends::{default_candidates, BackendCandidate},
    error::{Result, StudioError},
    isolate::DEFAULT_FOREGROUND_THRESHOLD,
    normalize::MAX_TARGET_SIZE,
    scenes::SceneCatalog,
    segmentation::BackdropKeySegmenter,
    transport::ModelRef,
    types::SamplingParams,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mask derivation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Alpha at or above this value is treated as subject (preserved)
    pub foreground_threshold: u8,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            foreground_threshold: DEFAULT_FOREGROUND_THRESHOLD,
        }
    }
}

/// Which segmentation capability isolates the product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SegmenterConfig {
    /// Hosted background removal (`cjwbw/rembg`) when an API token is
    /// available, local backdrop keying otherwise
    Auto,
    /// Local keying of a plain backdrop; works offline
    BackdropKey { tolerance: f32 },
    /// rembg-server style HTTP service
    Http {
        url: String,
        /// Send the API credential as bearer token
        #[serde(default)]
        authenticate: bool,
    },
    /// Hosted background-removal model
    Replicate { model: ModelRef },
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::Auto
    }
}

impl SegmenterConfig {
    /// Local keying with the default tolerance
    #[must_use]
    pub fn backdrop_key() -> Self {
        Self::BackdropKey {
            tolerance: BackdropKeySegmenter::DEFAULT_TOLERANCE,
        }
    }
}

/// Hosted-model API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub api_base: String,
    /// Per HTTP request
    pub request_timeout_secs: u64,
    /// Delay between prediction status polls
    pub poll_interval_ms: u64,
    /// Give up on a prediction still running after this long
    pub poll_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.replicate.com/v1".to_string(),
            request_timeout_secs: 120,
            poll_interval_ms: 1000,
            poll_timeout_secs: 300,
        }
    }
}

/// Configuration for a studio composition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Side length of the square canvas
    pub target_size: u32,
    /// Padding color (RGB)
    pub fill_color: [u8; 3],
    pub mask: MaskConfig,
    pub sampling: SamplingParams,
    pub negative_prompt: Option<String>,
    /// Generation backends, highest priority first
    pub candidates: Vec<BackendCandidate>,
    pub segmenter: SegmenterConfig,
    pub transport: TransportConfig,
    /// Total wall-clock budget for the candidate loop; `None` disables it
    pub generation_deadline_secs: Option<u64>,
    pub scenes: SceneCatalog,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            target_size: 1024,
            fill_color: [255, 255, 255],
            mask: MaskConfig::default(),
            sampling: SamplingParams::default(),
            negative_prompt: Some(
                "blurry, distorted, deformed product, extra objects, text, watermark, low quality"
                    .to_string(),
            ),
            candidates: default_candidates(),
            segmenter: SegmenterConfig::default(),
            transport: TransportConfig::default(),
            generation_deadline_secs: Some(300),
            scenes: SceneCatalog::default(),
        }
    }
}

impl StudioConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use backdrop_studio::StudioConfig;
    ///
    /// let config = StudioConfig::builder()
    ///     .target_size(768)
    ///     .steps(30)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.target_size, 768);
    /// ```
    #[must_use]
    pub fn builder() -> StudioConfigBuilder {
        StudioConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `InvalidConfig` naming the first offending parameter
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 || self.target_size > MAX_TARGET_SIZE {
            return Err(StudioError::config_value_error(
                "target size",
                self.target_size,
                &format!("1-{}", MAX_TARGET_SIZE),
                Some(1024),
            ));
        }

        if self.mask.foreground_threshold == 0 {
            return Err(StudioError::config_value_error(
                "foreground threshold",
                self.mask.foreground_threshold,
                "1-255",
                Some(DEFAULT_FOREGROUND_THRESHOLD),
            ));
        }

        self.sampling.validate()?;

        if self.candidates.is_empty() {
            return Err(StudioError::invalid_config(
                "at least one generation backend candidate is required",
            ));
        }

        match &self.segmenter {
            SegmenterConfig::BackdropKey { tolerance } if !tolerance.is_finite() || *tolerance < 0.0 => {
                return Err(StudioError::config_value_error(
                    "backdrop tolerance",
                    *tolerance,
                    ">= 0.0",
                    Some(BackdropKeySegmenter::DEFAULT_TOLERANCE),
                ));
            },
            SegmenterConfig::Http { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                return Err(StudioError::invalid_config(format!(
                    "segmentation URL '{}' must start with http:// or https://",
                    url
                )));
            },
            _ => {},
        }

        let transport = &self.transport;
        if transport.request_timeout_secs == 0
            || transport.poll_interval_ms == 0
            || transport.poll_timeout_secs == 0
        {
            return Err(StudioError::invalid_config(
                "transport timeouts and poll interval must be positive",
            ));
        }
        if transport.api_base.trim().is_empty() {
            return Err(StudioError::invalid_config("transport api_base must not be empty"));
        }

        if self.generation_deadline_secs == Some(0) {
            return Err(StudioError::config_value_error(
                "generation deadline (seconds)",
                0,
                ">= 1",
                Some(300),
            ));
        }

        self.scenes.validate()
    }

    #[must_use]
    pub fn generation_deadline(&self) -> Option<Duration> {
        self.generation_deadline_secs.map(Duration::from_secs)
    }

    /// Load and validate a JSON configuration file
    ///
    /// Missing fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref)
            .map_err(|e| StudioError::file_io_error("read config file", path_ref, &e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            StudioError::invalid_config(format!("{}: {}", path_ref.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StudioError::file_io_error("create config directory", parent, &e))?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path_ref, text)
            .map_err(|e| StudioError::file_io_error("write config file", path_ref, &e))
    }

    /// Per-user configuration location, e.g. `~/.config/backdrop-studio/config.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("backdrop-studio").join("config.json"))
    }

    /// Load `explicit` if given, else the per-user file if present, else defaults
    ///
    /// # Errors
    /// - `Io` when `explicit` cannot be read
    /// - `InvalidConfig` when a file does not parse or validate
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_json_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Loading configuration from {}", path.display());
                Self::from_json_file(path)
            },
            _ => Ok(Self::default()),
        }
    }
}

/// Builder for `StudioConfig`
#[derive(Debug, Default)]
pub struct StudioConfigBuilder {
    config: StudioConfig,
}

impl StudioConfigBuilder {
    /// Start from an existing configuration, e.g. one loaded from a file
    #[must_use]
    pub fn from_config(config: StudioConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn target_size(mut self, size: u32) -> Self {
        self.config.target_size = size;
        self
    }

    #[must_use]
    pub fn fill_color(mut self, color: [u8; 3]) -> Self {
        self.config.fill_color = color;
        self
    }

    #[must_use]
    pub fn foreground_threshold(mut self, threshold: u8) -> Self {
        self.config.mask.foreground_threshold = threshold;
        self
    }

    #[must_use]
    pub fn sampling(mut self, sampling: SamplingParams) -> Self {
        self.config.sampling = sampling;
        self
    }

    #[must_use]
    pub fn steps(mut self, steps: u32) -> Self {
        self.config.sampling.steps = steps;
        self
    }

    #[must_use]
    pub fn guidance_scale(mut self, guidance_scale: f32) -> Self {
        self.config.sampling.guidance_scale = guidance_scale;
        self
    }

    #[must_use]
    pub fn strength(mut self, strength: f32) -> Self {
        self.config.sampling.strength = strength;
        self
    }

    #[must_use]
    pub fn negative_prompt(mut self, negative_prompt: Option<String>) -> Self {
        self.config.negative_prompt = negative_prompt;
        self
    }

    /// Replace the candidate list (order is priority order)
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<BackendCandidate>) -> Self {
        self.config.candidates = candidates;
        self
    }

    #[must_use]
    pub fn segmenter(mut self, segmenter: SegmenterConfig) -> Self {
        self.config.segmenter = segmenter;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    #[must_use]
    pub fn generation_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.generation_deadline_secs = deadline.map(|d| d.as_secs().max(1));
        self
    }

    #[must_use]
    pub fn scenes(mut self, scenes: SceneCatalog) -> Self {
        self.config.scenes = scenes;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - `InvalidConfig` when any parameter is out of range
    pub fn build(self) -> Result<StudioConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
