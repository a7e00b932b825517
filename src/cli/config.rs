//! Configuration conversion utilities for CLI arguments

use crate::backends::{BackendCandidate, BackendFamily};
use crate::cli::main_impl::{Cli, CliSegmenter};
use crate::config::{SegmenterConfig, StudioConfig, StudioConfigBuilder};
use crate::segmentation::ReplicateSegmenter;
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to a validated `StudioConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Load the config file (explicit or default location) and apply flag overrides
    pub(crate) fn from_cli(cli: &Cli) -> Result<StudioConfig> {
        let base = StudioConfig::load(cli.config.as_deref()).context("Failed to load config file")?;
        Self::apply_overrides(cli, base)
    }

    pub(crate) fn apply_overrides(cli: &Cli, base: StudioConfig) -> Result<StudioConfig> {
        let mut builder = StudioConfigBuilder::from_config(base.clone());

        if let Some(size) = cli.target_size {
            builder = builder.target_size(size);
        }
        if let Some(steps) = cli.steps {
            builder = builder.steps(steps);
        }
        if let Some(guidance) = cli.guidance {
            builder = builder.guidance_scale(guidance);
        }
        if !cli.backends.is_empty() {
            builder = builder.candidates(Self::candidates(&cli.backends));
        }
        if let Some(segmenter) = Self::segmenter(cli, &base.segmenter)? {
            builder = builder.segmenter(segmenter);
        }
        if let Some(secs) = cli.deadline {
            let deadline = (secs > 0).then(|| Duration::from_secs(secs));
            builder = builder.generation_deadline(deadline);
        }

        builder.build().context("Invalid configuration")
    }

    fn candidates(families: &[BackendFamily]) -> Vec<BackendCandidate> {
        families.iter().copied().map(BackendCandidate::new).collect()
    }

    fn segmenter(cli: &Cli, current: &SegmenterConfig) -> Result<Option<SegmenterConfig>> {
        let Some(kind) = cli.segmenter else {
            if cli.segmenter_url.is_some() {
                anyhow::bail!("--segmenter-url requires --segmenter http");
            }
            return Ok(None);
        };

        let config = match kind {
            CliSegmenter::Auto => SegmenterConfig::Auto,
            CliSegmenter::BackdropKey => match current {
                SegmenterConfig::BackdropKey { .. } => current.clone(),
                _ => SegmenterConfig::backdrop_key(),
            },
            CliSegmenter::Replicate => match current {
                SegmenterConfig::Replicate { .. } => current.clone(),
                _ => SegmenterConfig::Replicate {
                    model: ReplicateSegmenter::default_model(),
                },
            },
            CliSegmenter::Http => {
                let url = match (&cli.segmenter_url, current) {
                    (Some(url), _) => url.clone(),
                    (None, SegmenterConfig::Http { url, .. }) => url.clone(),
                    (None, _) => anyhow::bail!("--segmenter http requires --segmenter-url"),
                };
                let authenticate = matches!(current, SegmenterConfig::Http { authenticate: true, .. });
                SegmenterConfig::Http { url, authenticate }
            },
        };
        Ok(Some(config))
    }
}
