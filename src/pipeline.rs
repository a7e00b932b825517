//! End-to-end composition pipeline
//!
//! Normalize → isolate → generate, strictly in sequence. All collaborators
//! (segmenter, transport, progress reporter) are injected so the pipeline
//! runs the same against hosted models and against test doubles.

use crate::{
    config::{SegmenterConfig, StudioConfig},
    error::{Result, StudioError},
    isolate::SubjectIsolator,
    normalize::CanvasNormalizer,
    orchestrator::GenerationOrchestrator,
    scenes::SceneCatalog,
    segmentation::{BackdropKeySegmenter, HttpSegmenter, ReplicateSegmenter, Segmenter},
    services::{NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressTracker},
    tracing_config::{events, spans},
    transport::{Credential, PredictionTransport},
    types::{AlphaMask, BinaryMask, Canvas, GenerationOutcome, ProcessingTimings, SourceImage},
};
use instant::Instant;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Instrument};

/// What to compose: a product description and a scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionRequest {
    pub product_type: String,
    /// Scene key or label from the catalog
    pub scene: String,
    prompt_override: Option<String>,
}

impl CompositionRequest {
    #[must_use]
    pub fn new<P: Into<String>, S: Into<String>>(product_type: P, scene: S) -> Self {
        Self {
            product_type: product_type.into(),
            scene: scene.into(),
            prompt_override: None,
        }
    }

    /// Request with a finished prompt, bypassing the scene catalog
    #[must_use]
    pub fn with_prompt<S: Into<String>>(prompt: S) -> Self {
        Self {
            product_type: String::new(),
            scene: String::new(),
            prompt_override: Some(prompt.into()),
        }
    }

    /// Final prompt text for this request
    ///
    /// # Errors
    /// - `InvalidConfig` for an unknown scene, blank product type or blank prompt
    pub fn resolve_prompt(&self, catalog: &SceneCatalog) -> Result<String> {
        match &self.prompt_override {
            Some(prompt) if prompt.trim().is_empty() => {
                Err(StudioError::invalid_config("prompt must not be empty"))
            },
            Some(prompt) => Ok(prompt.trim().to_string()),
            None => catalog.compose_prompt(&self.scene, &self.product_type),
        }
    }
}

/// Output of the offline half: canvas plus masks
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub canvas: Canvas,
    pub alpha: AlphaMask,
    pub mask: BinaryMask,
    pub timings: ProcessingTimings,
}

/// Output of a full composition
#[derive(Debug, Clone)]
pub struct CompositionResult {
    pub prepared: PreparedInput,
    pub prompt: String,
    pub outcome: GenerationOutcome,
    pub timings: ProcessingTimings,
}

/// Composition pipeline with injected collaborators
pub struct StudioPipeline {
    config: StudioConfig,
    normalizer: CanvasNormalizer,
    isolator: SubjectIsolator,
    orchestrator: GenerationOrchestrator,
    transport: Arc<dyn PredictionTransport>,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for StudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudioPipeline")
            .field("normalizer", &self.normalizer)
            .field("isolator", &self.isolator)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl StudioPipeline {
    /// # Errors
    /// - `InvalidConfig` when `config` does not validate
    pub fn new(
        config: StudioConfig,
        segmenter: Arc<dyn Segmenter>,
        transport: Arc<dyn PredictionTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let normalizer = CanvasNormalizer::new(config.target_size, config.fill_color);
        let isolator =
            SubjectIsolator::new(segmenter).with_threshold(config.mask.foreground_threshold)?;
        let mut orchestrator = GenerationOrchestrator::new(Arc::clone(&transport), &config.candidates)?;
        if let Some(deadline) = config.generation_deadline() {
            orchestrator = orchestrator.with_deadline(deadline);
        }

        Ok(Self {
            config,
            normalizer,
            isolator,
            orchestrator,
            transport,
            reporter: Arc::new(NoOpProgressReporter),
        })
    }

    /// Report stage progress and candidate fallbacks to `reporter`
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.orchestrator = self.orchestrator.with_reporter(Arc::clone(&reporter));
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    /// Normalize and isolate; no generation backend is contacted
    pub async fn prepare(&self, source: &SourceImage) -> Result<PreparedInput> {
        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter));
        let result = self.prepare_tracked(source, &mut tracker).await;
        match &result {
            Ok(prepared) => tracker.report_completion(prepared.timings.clone()),
            Err(e) => tracker.report_error(&e.to_string()),
        }
        result
    }

    /// Prepare, then run the candidate loop
    ///
    /// The prompt is resolved first so a bad scene fails before any work.
    pub async fn compose(
        &self,
        source: &SourceImage,
        request: &CompositionRequest,
    ) -> Result<CompositionResult> {
        let prompt = request.resolve_prompt(&self.config.scenes)?;
        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter));

        let result = self.compose_tracked(source, prompt, &mut tracker).await;
        match &result {
            Ok(composition) => tracker.report_completion(composition.timings.clone()),
            Err(e) => {
                events::error_with_context(e, "composition");
                tracker.report_error(&e.to_string());
            },
        }
        result
    }

    /// Download the generated image through the transport
    pub async fn fetch_result(&self, outcome: &GenerationOutcome) -> Result<Vec<u8>> {
        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter));
        tracker.report_stage(ProcessingStage::Download);

        let span = spans::download(&outcome.image.to_string());
        let result = self.transport.fetch(&outcome.image).instrument(span).await;
        if let Err(e) = &result {
            tracker.report_error(&e.to_string());
        }
        result
    }

    async fn prepare_tracked(
        &self,
        source: &SourceImage,
        tracker: &mut ProgressTracker,
    ) -> Result<PreparedInput> {
        let started = Instant::now();

        tracker.report_stage(ProcessingStage::Normalization);
        let canvas = {
            let _guard = spans::normalization(source.dimensions(), self.normalizer.target_size).entered();
            self.normalizer.normalize(source)?
        };
        let normalization_ms = started.elapsed().as_millis() as u64;
        events::performance_metric("normalization", normalization_ms);

        tracker.report_stage(ProcessingStage::Isolation);
        let isolation_started = Instant::now();
        let span = spans::isolation(self.isolator.segmenter_name(), canvas.size());
        let (alpha, mask) = self.isolator.isolate(&canvas).instrument(span).await?;
        let isolation_ms = isolation_started.elapsed().as_millis() as u64;
        events::performance_metric("isolation", isolation_ms);

        Ok(PreparedInput {
            canvas,
            alpha,
            mask,
            timings: ProcessingTimings {
                normalization_ms,
                isolation_ms,
                generation_ms: 0,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    async fn compose_tracked(
        &self,
        source: &SourceImage,
        prompt: String,
        tracker: &mut ProgressTracker,
    ) -> Result<CompositionResult> {
        let started = Instant::now();
        let prepared = self.prepare_tracked(source, tracker).await?;

        tracker.report_stage_with_description(
            ProcessingStage::Generation,
            format!(
                "Generating scene ({} candidate(s): {})",
                self.orchestrator.candidate_names().len(),
                self.orchestrator.candidate_names().join(" → ")
            ),
        );
        let generation_started = Instant::now();
        let outcome = self
            .orchestrator
            .generate(
                &prepared.canvas,
                &prepared.mask,
                &prompt,
                self.config.negative_prompt.as_deref(),
                self.config.sampling,
            )
            .await?;
        let generation_ms = generation_started.elapsed().as_millis() as u64;
        events::performance_metric("generation", generation_ms);

        info!(
            backend = %outcome.backend,
            fallbacks = outcome.failures.len(),
            image = %outcome.image,
            "Composition generated"
        );

        let timings = ProcessingTimings {
            normalization_ms: prepared.timings.normalization_ms,
            isolation_ms: prepared.timings.isolation_ms,
            generation_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };
        Ok(CompositionResult {
            prepared,
            prompt,
            outcome,
            timings,
        })
    }
}

/// Build the segmenter `config` asks for
///
/// [`SegmenterConfig::Auto`] resolves to hosted background removal when both
/// a transport and a credential are supplied, and to local backdrop keying
/// otherwise.
///
/// # Errors
/// - `MissingCredential` when the segmenter needs the API token or hosted
///   transport and none was supplied
/// - `InvalidConfig`/`Network` when the HTTP segmenter cannot be created
pub fn build_segmenter(
    config: &StudioConfig,
    transport: Option<Arc<dyn PredictionTransport>>,
    credential: Option<&Credential>,
) -> Result<Arc<dyn Segmenter>> {
    match &config.segmenter {
        SegmenterConfig::Auto => match transport {
            Some(transport) if credential.is_some() => {
                info!("Isolating with hosted background removal");
                Ok(Arc::new(ReplicateSegmenter::new(
                    transport,
                    ReplicateSegmenter::default_model(),
                )))
            },
            _ => {
                info!("No API token for hosted background removal, keying the backdrop locally");
                Ok(Arc::new(BackdropKeySegmenter::default()))
            },
        },
        SegmenterConfig::BackdropKey { tolerance } => {
            Ok(Arc::new(BackdropKeySegmenter::new(*tolerance)))
        },
        SegmenterConfig::Http { url, authenticate } => {
            let token = if *authenticate {
                let credential = credential.ok_or_else(|| {
                    StudioError::missing_credential(
                        "the configured segmentation service requires an API token",
                    )
                })?;
                Some(credential.expose().to_string())
            } else {
                None
            };
            Ok(Arc::new(HttpSegmenter::new(
                url,
                token,
                Duration::from_secs(config.transport.request_timeout_secs),
            )?))
        },
        SegmenterConfig::Replicate { model } => {
            let transport = transport.ok_or_else(|| {
                StudioError::missing_credential("hosted segmentation requires an API token")
            })?;
            Ok(Arc::new(ReplicateSegmenter::new(transport, model.clone())))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{disc_alpha, MockResponse, MockSegmenter, MockTransport};
    use crate::backends::SdxlAdapter;
    use crate::types::ImageReference;
    use image::{DynamicImage, RgbImage};

    fn source(width: u32, height: u32) -> SourceImage {
        SourceImage::new(&DynamicImage::ImageRgb8(RgbImage::new(width, height))).unwrap()
    }

    fn small_config() -> StudioConfig {
        StudioConfig::builder().target_size(64).build().unwrap()
    }

    #[test]
    fn test_request_prompt_resolution() {
        let catalog = SceneCatalog::default();
        let prompt = CompositionRequest::new("candle", "infinity-white")
            .resolve_prompt(&catalog)
            .unwrap();
        assert!(prompt.contains("of a candle, placed on a pure white"));

        let custom = CompositionRequest::with_prompt(" a candle on the moon ")
            .resolve_prompt(&catalog)
            .unwrap();
        assert_eq!(custom, "a candle on the moon");

        assert!(CompositionRequest::with_prompt("")
            .resolve_prompt(&catalog)
            .is_err());
    }

    #[tokio::test]
    async fn test_prepare_runs_offline() {
        let transport = Arc::new(MockTransport::new());
        let pipeline = StudioPipeline::new(
            small_config(),
            Arc::new(MockSegmenter::with_alpha(disc_alpha(64, (32, 32), 10))),
            transport.clone(),
        )
        .unwrap();

        let prepared = pipeline.prepare(&source(30, 60)).await.unwrap();
        assert_eq!(prepared.canvas.dimensions(), (64, 64));
        assert_eq!(prepared.mask.dimensions(), (64, 64));
        assert_eq!(prepared.mask.get(32, 32), 0);
        assert!(transport.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_scene_fails_before_segmentation() {
        let segmenter = Arc::new(MockSegmenter::with_alpha(disc_alpha(64, (32, 32), 10)));
        let pipeline = StudioPipeline::new(
            small_config(),
            segmenter.clone(),
            Arc::new(MockTransport::new()),
        )
        .unwrap();

        let err = pipeline
            .compose(&source(10, 10), &CompositionRequest::new("vase", "beach"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::InvalidConfig(_)));
        assert!(segmenter.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_compose_and_fetch() {
        let transport = Arc::new(
            MockTransport::new()
                .respond(
                    &SdxlAdapter::default_model(),
                    MockResponse::url("https://cdn.example/out.png"),
                )
                .with_download("https://cdn.example/out.png", vec![1, 2, 3]),
        );
        let pipeline = StudioPipeline::new(
            small_config(),
            Arc::new(MockSegmenter::with_alpha(disc_alpha(64, (32, 32), 10))),
            transport.clone(),
        )
        .unwrap();

        let result = pipeline
            .compose(&source(40, 20), &CompositionRequest::new("vase", "marble"))
            .await
            .unwrap();
        assert_eq!(result.outcome.backend, "sdxl");
        assert!(result.prompt.contains("white carrara marble"));
        assert_eq!(pipeline.fetch_result(&result.outcome).await.unwrap(), vec![1, 2, 3]);

        let inputs = transport.get_inputs();
        assert_eq!(inputs[0]["prompt"], result.prompt.as_str());
        assert!(inputs[0]["negative_prompt"].is_string());
    }

    #[derive(Default)]
    struct StageRecorder {
        stages: std::sync::Mutex<Vec<ProcessingStage>>,
        errors: std::sync::Mutex<Vec<(ProcessingStage, String)>>,
    }

    impl ProgressReporter for StageRecorder {
        fn report_progress(&self, update: crate::services::ProgressUpdate) {
            self.stages.lock().unwrap().push(update.stage);
        }

        fn report_completion(&self, _timings: ProcessingTimings) {}

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[tokio::test]
    async fn test_fetch_reports_download_stage() {
        let transport = Arc::new(
            MockTransport::new().with_download("https://cdn.example/out.png", vec![9]),
        );
        let recorder = Arc::new(StageRecorder::default());
        let pipeline = StudioPipeline::new(
            small_config(),
            Arc::new(MockSegmenter::with_alpha(disc_alpha(64, (32, 32), 10))),
            transport,
        )
        .unwrap()
        .with_reporter(recorder.clone());

        let outcome = |url: &str| GenerationOutcome {
            image: ImageReference::Url(url.to_string()),
            backend: "sdxl".to_string(),
            failures: Vec::new(),
        };
        assert_eq!(
            pipeline.fetch_result(&outcome("https://cdn.example/out.png")).await.unwrap(),
            vec![9]
        );
        assert!(pipeline.fetch_result(&outcome("https://cdn.example/gone.png")).await.is_err());

        assert_eq!(
            recorder.stages.lock().unwrap().as_slice(),
            [ProcessingStage::Download, ProcessingStage::Download]
        );
        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ProcessingStage::Download);
        assert!(errors[0].1.contains("gone.png"));
    }

    #[test]
    fn test_auto_segmenter_prefers_hosted_removal() {
        let config = StudioConfig::default();
        assert_eq!(config.segmenter, SegmenterConfig::Auto);

        let offline = build_segmenter(&config, None, None).unwrap();
        assert_eq!(offline.name(), "backdrop-key");

        let credential = Credential::new("token").unwrap();
        let transport: Arc<dyn PredictionTransport> = Arc::new(MockTransport::new());
        let hosted =
            build_segmenter(&config, Some(Arc::clone(&transport)), Some(&credential)).unwrap();
        assert_eq!(hosted.name(), "replicate");

        // A transport alone is not enough
        let keyed = build_segmenter(&config, Some(transport), None).unwrap();
        assert_eq!(keyed.name(), "backdrop-key");
    }

    #[test]
    fn test_build_segmenter_requirements() {
        let mut config = StudioConfig::default();
        assert!(build_segmenter(&config, None, None).is_ok());

        config.segmenter = SegmenterConfig::Replicate {
            model: ReplicateSegmenter::default_model(),
        };
        assert!(matches!(
            build_segmenter(&config, None, None).err().unwrap(),
            StudioError::MissingCredential(_)
        ));
        assert!(build_segmenter(&config, Some(Arc::new(MockTransport::new())), None).is_ok());

        config.segmenter = SegmenterConfig::Http {
            url: "http://localhost:7000/remove".to_string(),
            authenticate: true,
        };
        assert!(build_segmenter(&config, None, None).is_err());
        let credential = Credential::new("token").unwrap();
        assert!(build_segmenter(&config, None, Some(&credential)).is_ok());
    }
}
