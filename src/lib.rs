#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Backdrop Studio
//!
//! Product photography preprocessing and generative backdrop replacement.
//!
//! A product photo goes through three stages:
//!
//! 1. **Canvas normalization**: any-sized upload is scaled to fit and centered
//!    on a square canvas (1024×1024 by default) without distortion
//! 2. **Subject isolation**: a pluggable segmenter separates the product from its
//!    backdrop and a binary inpainting mask is derived (0 = keep the product,
//!    255 = regenerate the backdrop)
//! 3. **Generation**: canvas, mask and a scene prompt go to an ordered list of
//!    hosted inpainting models (SDXL, FLUX Fill, Stable Diffusion inpainting);
//!    the first one that returns an image wins
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backdrop_studio::{compose_from_bytes, CompositionRequest, StudioConfig};
//!
//! # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let config = StudioConfig::default();
//! let request = CompositionRequest::new("ceramic vase", "marble");
//! let token = std::env::var("REPLICATE_API_TOKEN").ok();
//!
//! let result = compose_from_bytes(&upload, &request, &config, token.as_deref()).await?;
//! println!("{} produced {}", result.outcome.backend, result.outcome.image);
//! # Ok(())
//! # }
//! ```
//!
//! ## Offline preparation
//!
//! Normalization and masking never contact a generation backend. With the
//! default local segmenter they run fully offline:
//!
//! ```rust,no_run
//! use backdrop_studio::{prepare_from_bytes, ImageIOService, StudioConfig};
//!
//! # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let prepared = prepare_from_bytes(&upload, &StudioConfig::default()).await?;
//! ImageIOService::save_image(&prepared.canvas.into_image(), "canvas.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface, progress spinner and tracing subscriber
//! - `webp-support` (default): WebP uploads
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod isolate;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod scenes;
pub mod segmentation;
pub mod services;
pub mod tracing_config;
pub mod transport;
pub mod types;

use std::sync::Arc;
use tokio::io::AsyncRead;

// Public API exports
pub use backends::{
    default_candidates, parse_image_reference, BackendAdapter, BackendCandidate, BackendFamily,
    FluxFillAdapter, SdxlAdapter, StableDiffusionInpaintAdapter,
};
pub use config::{MaskConfig, SegmenterConfig, StudioConfig, StudioConfigBuilder, TransportConfig};
pub use error::{BackendFailure, FailureCategory, FailureKind, Result, StudioError};
pub use isolate::{binary_from_alpha, SubjectIsolator, DEFAULT_FOREGROUND_THRESHOLD};
pub use normalize::{normalize, CanvasNormalizer};
pub use orchestrator::GenerationOrchestrator;
pub use pipeline::{
    build_segmenter, CompositionRequest, CompositionResult, PreparedInput, StudioPipeline,
};
pub use scenes::{Scene, SceneCatalog};
pub use segmentation::{BackdropKeySegmenter, HttpSegmenter, ReplicateSegmenter, Segmenter};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};
#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use transport::{Credential, ModelRef, OfflineTransport, PredictionTransport, ReplicateClient};
pub use types::{
    AlphaMask, BinaryMask, Canvas, GenerationOutcome, ImageReference, MaskPolarity,
    ProcessingTimings, SamplingParams, SourceImage,
};

/// Compose a product photo into a scene from uploaded bytes
///
/// The API token is checked before anything else: a missing or blank token
/// fails with [`StudioError::MissingCredential`] without decoding the upload or
/// contacting any service.
///
/// # Arguments
///
/// * `image_bytes` - Raw upload (JPEG, PNG, WebP, TIFF)
/// * `request` - Product type and scene
/// * `config` - Studio configuration
/// * `api_token` - Replicate API token
///
/// # Examples
///
/// ```rust,no_run
/// use backdrop_studio::{compose_from_bytes, CompositionRequest, StudioConfig};
///
/// # async fn example(upload_bytes: Vec<u8>, token: String) -> anyhow::Result<()> {
/// let config = StudioConfig::builder().steps(30).build()?;
/// let request = CompositionRequest::new("leather handbag", "rustic-wood");
/// let result = compose_from_bytes(&upload_bytes, &request, &config, Some(&token)).await?;
/// for failure in &result.outcome.failures {
///     eprintln!("fell back past {}", failure);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn compose_from_bytes(
    image_bytes: &[u8],
    request: &CompositionRequest,
    config: &StudioConfig,
    api_token: Option<&str>,
) -> Result<CompositionResult> {
    let credential = Credential::from_option(api_token)?;
    let source = SourceImage::from_bytes(image_bytes)?;

    let transport: Arc<dyn PredictionTransport> =
        Arc::new(ReplicateClient::new(credential.clone(), &config.transport)?);
    let segmenter = build_segmenter(config, Some(Arc::clone(&transport)), Some(&credential))?;

    StudioPipeline::new(config.clone(), segmenter, transport)?
        .compose(&source, request)
        .await
}

/// Normalize and mask an upload without generating anything
///
/// Segmenters that need the API token (hosted segmentation, an authenticated
/// HTTP service) are rejected with [`StudioError::MissingCredential`]; build a
/// [`StudioPipeline`] directly for those.
pub async fn prepare_from_bytes(image_bytes: &[u8], config: &StudioConfig) -> Result<PreparedInput> {
    let source = SourceImage::from_bytes(image_bytes)?;
    let segmenter = build_segmenter(config, None, None)?;
    StudioPipeline::new(config.clone(), segmenter, Arc::new(OfflineTransport))?
        .prepare(&source)
        .await
}

/// Prepare an upload read from an async stream
pub async fn prepare_from_reader<R: AsyncRead + Unpin>(
    reader: R,
    config: &StudioConfig,
) -> Result<PreparedInput> {
    let buffer = ImageIOService::read_from_reader(reader).await?;
    prepare_from_bytes(&buffer, config).await
}
