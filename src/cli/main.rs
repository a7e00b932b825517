//! Backdrop Studio CLI
//!
//! Command-line interface for composing product photos into generated scenes.

use super::config::CliConfigBuilder;
use crate::{
    backends::BackendFamily,
    error::{FailureCategory, StudioError},
    pipeline::{build_segmenter, CompositionRequest, StudioPipeline},
    services::{ImageIOService, ProcessingStage, ProgressReporter, ProgressUpdate},
    tracing_config::{events, init_cli_tracing, spans, TracingFormat},
    transport::{Credential, OfflineTransport, PredictionTransport, ReplicateClient},
    types::{ProcessingTimings, SourceImage},
    BackendFailure, StudioConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Product photo studio: place a product into a generated scene
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "backdrop-studio")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Product photo to compose
    #[arg(value_name = "INPUT", required_unless_present = "list_scenes")]
    pub input: Option<PathBuf>,

    /// What the product is, e.g. "ceramic vase"
    #[arg(short, long)]
    pub product: Option<String>,

    /// Scene key or label (see --list-scenes)
    #[arg(short, long, default_value = "marble")]
    pub scene: String,

    /// Use this prompt verbatim instead of product and scene
    #[arg(long, conflicts_with = "product")]
    pub prompt: Option<String>,

    /// Output file for the generated image [default: <INPUT-STEM>_studio.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Also write the inpainting mask (black = product, white = regenerate)
    #[arg(long, value_name = "PATH")]
    pub mask_out: Option<PathBuf>,

    /// Also write the normalized square canvas
    #[arg(long, value_name = "PATH")]
    pub canvas_out: Option<PathBuf>,

    /// Write canvas and mask only; no generation backend is contacted
    #[arg(long)]
    pub prepare_only: bool,

    /// Configuration file [default: <config dir>/backdrop-studio/config.json if present]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Replicate API token
    #[arg(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Canvas side length in pixels
    #[arg(long)]
    pub target_size: Option<u32>,

    /// Denoising steps
    #[arg(long)]
    pub steps: Option<u32>,

    /// Guidance scale
    #[arg(long)]
    pub guidance: Option<f32>,

    /// Ordered backend candidates, comma separated (sdxl, flux-fill, sd-inpainting)
    #[arg(long, value_delimiter = ',')]
    pub backends: Vec<BackendFamily>,

    /// Segmentation method
    #[arg(long, value_enum)]
    pub segmenter: Option<CliSegmenter>,

    /// Background-removal service URL (with --segmenter http)
    #[arg(long, value_name = "URL")]
    pub segmenter_url: Option<String>,

    /// Total time budget for generation in seconds (0 disables the limit)
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// List available scenes and exit
    #[arg(long)]
    pub list_scenes: bool,

    /// Log output format (json needs the tracing-json feature)
    #[arg(long, value_enum, default_value_t = LogFormat::Console)]
    pub log_format: LogFormat,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliSegmenter {
    /// Background-removal model when a token is available, local keying otherwise
    Auto,
    /// Local key-out of a plain backdrop
    BackdropKey,
    /// Background-removal model on Replicate
    Replicate,
    /// Background-removal service at --segmenter-url
    Http,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum LogFormat {
    /// Colored, human-readable
    Console,
    /// Plain compact lines for CI logs
    Compact,
    /// Structured JSON
    Json,
}

impl LogFormat {
    /// Subscriber format, plus a warning when the requested one is not compiled in
    fn resolve(self) -> (TracingFormat, Option<&'static str>) {
        match self {
            Self::Console => (TracingFormat::Console, None),
            Self::Compact => (TracingFormat::Compact, None),
            #[cfg(feature = "tracing-json")]
            Self::Json => (TracingFormat::Json, None),
            #[cfg(not(feature = "tracing-json"))]
            Self::Json => (
                TracingFormat::Console,
                Some("JSON logs need the tracing-json feature, using console output"),
            ),
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (format, format_warning) = cli.log_format.resolve();
    let session_id = init_cli_tracing(cli.verbose, format).context("Failed to initialize tracing")?;
    if let Some(message) = format_warning {
        warn!("{}", message);
    }

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.list_scenes {
        list_scenes(&config);
        return Ok(());
    }

    let Some(input) = cli.input.as_deref() else {
        anyhow::bail!("An input image is required");
    };

    let span = spans::session(
        &session_id,
        cli.product.as_deref().unwrap_or("-"),
        &cli.scene,
    );
    let outcome = run(&cli, config, input).instrument(span).await;

    if let Err(e) = &outcome {
        if let Some(studio_error) = e.downcast_ref::<StudioError>() {
            error!("{}", studio_error.user_message());
            std::process::exit(exit_code(studio_error.category()));
        }
    }
    outcome
}

async fn run(cli: &Cli, config: StudioConfig, input: &Path) -> Result<()> {
    let bytes = ImageIOService::read_upload(input)?;
    let source = SourceImage::from_bytes(&bytes)?;
    info!(
        "Loaded {} ({}x{})",
        input.display(),
        source.width(),
        source.height()
    );

    if cli.prepare_only {
        return prepare_only(cli, config, input, &source).await;
    }

    let request = match &cli.prompt {
        Some(prompt) => CompositionRequest::with_prompt(prompt.clone()),
        None => {
            let product = cli
                .product
                .as_deref()
                .context("--product is required unless --prompt or --prepare-only is given")?;
            CompositionRequest::new(product, cli.scene.clone())
        },
    };

    let credential = Credential::from_option(cli.api_token.as_deref())?;
    let transport: Arc<dyn PredictionTransport> =
        Arc::new(ReplicateClient::new(credential.clone(), &config.transport)?);
    let segmenter = build_segmenter(&config, Some(Arc::clone(&transport)), Some(&credential))?;

    let spinner = SpinnerReporter::new();
    let pipeline = StudioPipeline::new(config, segmenter, transport)?
        .with_reporter(Arc::new(spinner.clone()));

    let result = pipeline.compose(&source, &request).await?;
    info!("Prompt: {}", result.prompt);
    for failure in &result.outcome.failures {
        warn!("Skipped {}", failure);
    }

    write_prepared_outputs(
        cli.canvas_out.as_deref(),
        cli.mask_out.as_deref(),
        &result.prepared.canvas.clone().into_image(),
        &image::DynamicImage::ImageLuma8(result.prepared.mask.data().clone()),
    )?;

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| generate_output_path(input, "studio"));
    let image_bytes = pipeline.fetch_result(&result.outcome).await?;
    ImageIOService::write_bytes(&image_bytes, &output_path)?;

    if let Some(url) = result.outcome.image.as_url() {
        println!("{}", url);
    }
    events::progress(
        &format!(
            "Generated with {} → {} ({})",
            result.outcome.backend,
            output_path.display(),
            result.timings.breakdown()
        ),
        "✅",
    );
    Ok(())
}

async fn prepare_only(
    cli: &Cli,
    config: StudioConfig,
    input: &Path,
    source: &SourceImage,
) -> Result<()> {
    // Hosted segmentation still needs the token; local keying does not
    let credential = cli
        .api_token
        .as_deref()
        .and_then(|token| Credential::new(token).ok());
    let transport: Arc<dyn PredictionTransport> = match &credential {
        Some(credential) => Arc::new(ReplicateClient::new(credential.clone(), &config.transport)?),
        None => Arc::new(OfflineTransport),
    };
    let segmenter = build_segmenter(
        &config,
        credential.as_ref().map(|_| Arc::clone(&transport)),
        credential.as_ref(),
    )?;

    let pipeline = StudioPipeline::new(config, segmenter, transport)?;
    let prepared = pipeline.prepare(source).await?;

    let canvas_out = cli
        .canvas_out
        .clone()
        .unwrap_or_else(|| generate_output_path(input, "canvas"));
    let mask_out = cli
        .mask_out
        .clone()
        .unwrap_or_else(|| generate_output_path(input, "mask"));
    write_prepared_outputs(
        Some(&canvas_out),
        Some(&mask_out),
        &prepared.canvas.into_image(),
        &image::DynamicImage::ImageLuma8(prepared.mask.data().clone()),
    )?;

    events::progress(
        &format!(
            "Prepared {} → {}, {} ({})",
            input.display(),
            canvas_out.display(),
            mask_out.display(),
            prepared.timings.breakdown()
        ),
        "✅",
    );
    Ok(())
}

fn write_prepared_outputs(
    canvas_out: Option<&Path>,
    mask_out: Option<&Path>,
    canvas: &image::DynamicImage,
    mask: &image::DynamicImage,
) -> Result<()> {
    if let Some(path) = canvas_out {
        ImageIOService::save_image(canvas, path).context("Failed to save canvas")?;
    }
    if let Some(path) = mask_out {
        ImageIOService::save_image(mask, path).context("Failed to save mask")?;
    }
    Ok(())
}

fn list_scenes(config: &StudioConfig) {
    for scene in config.scenes.scenes() {
        println!("{:<20} {}", scene.key, scene.label);
    }
}

fn exit_code(category: FailureCategory) -> i32 {
    match category {
        FailureCategory::InvalidInput => 2,
        FailureCategory::IsolationFailed => 3,
        FailureCategory::BackendsUnavailable => 4,
        FailureCategory::Configuration => 5,
        FailureCategory::Internal => 1,
    }
}

/// `<dir>/<stem>_<suffix>.png` next to the input
fn generate_output_path(input_path: &Path, suffix: &str) -> PathBuf {
    let stem = input_path.file_stem().unwrap_or_default();
    let dir = input_path.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}_{}.png", stem.to_string_lossy(), suffix))
}

/// Spinner shown while the pipeline runs
#[derive(Clone)]
struct SpinnerReporter {
    bar: ProgressBar,
}

impl SpinnerReporter {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressReporter for SpinnerReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar
            .set_message(format!("[{}%] {}", update.progress, update.description));
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        self.bar
            .finish_with_message(format!("✅ Done in {:.1}s", timings.total_ms as f64 / 1000.0));
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.bar
            .abandon_with_message(format!("❌ {} failed: {}", stage.description(), error));
    }

    fn report_fallback(&self, failure: &BackendFailure) {
        self.bar
            .println(format!("↪ {} failed ({}), trying next backend", failure.backend, failure.kind));
    }
}
