//! Generation orchestration with backend fallback
//!
//! Candidates are tried strictly in order, one at a time. The first candidate
//! that produces an image wins; failures are recorded and the next candidate is
//! tried. The same candidate is never retried. When a total deadline is set,
//! no new candidate is started once it has passed and a running attempt is cut
//! off when it runs out.

use crate::{
    backends::{BackendAdapter, BackendCandidate},
    error::{BackendFailure, FailureKind, Result, StudioError},
    services::ProgressReporter,
    tracing_config::{events, spans},
    transport::PredictionTransport,
    types::{BinaryMask, Canvas, GenerationOutcome, GenerationRequest, ImageReference, SamplingParams},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

/// Runs a generation request against an ordered list of backend candidates
pub struct GenerationOrchestrator {
    transport: Arc<dyn PredictionTransport>,
    candidates: Vec<Box<dyn BackendAdapter>>,
    deadline: Option<Duration>,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl std::fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("candidates", &self.candidate_names())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl GenerationOrchestrator {
    /// Build adapters for `candidates`, keeping their order
    ///
    /// # Errors
    /// - `InvalidConfig` when `candidates` is empty
    pub fn new(
        transport: Arc<dyn PredictionTransport>,
        candidates: &[BackendCandidate],
    ) -> Result<Self> {
        Self::from_adapters(
            transport,
            candidates.iter().map(BackendCandidate::build_adapter).collect(),
        )
    }

    /// Use already-built adapters, e.g. custom [`BackendAdapter`] implementations
    ///
    /// # Errors
    /// - `InvalidConfig` when `adapters` is empty
    pub fn from_adapters(
        transport: Arc<dyn PredictionTransport>,
        adapters: Vec<Box<dyn BackendAdapter>>,
    ) -> Result<Self> {
        if adapters.is_empty() {
            return Err(StudioError::invalid_config(
                "at least one generation backend candidate is required",
            ));
        }
        Ok(Self {
            transport,
            candidates: adapters,
            deadline: None,
            reporter: None,
        })
    }

    /// Total wall-clock budget for all attempts together
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Receive a notification for every failed candidate
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    #[must_use]
    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.name()).collect()
    }

    /// Try each candidate in order until one yields an image
    ///
    /// # Errors
    /// - `InvalidConfig` for an empty prompt, invalid sampling parameters or
    ///   mismatched canvas and mask dimensions
    /// - `AllBackendsExhausted` carrying the last candidate's failure
    /// - `GenerationDeadlineExceeded` when the deadline stopped the loop
    pub async fn generate(
        &self,
        canvas: &Canvas,
        mask: &BinaryMask,
        prompt: &str,
        negative_prompt: Option<&str>,
        params: SamplingParams,
    ) -> Result<GenerationOutcome> {
        if prompt.trim().is_empty() {
            return Err(StudioError::invalid_config("prompt must not be empty"));
        }
        params.validate()?;
        if canvas.dimensions() != mask.dimensions() {
            return Err(StudioError::invalid_config(format!(
                "mask dimensions {:?} do not match canvas dimensions {:?}",
                mask.dimensions(),
                canvas.dimensions()
            )));
        }

        let started = Instant::now();
        let mut failures: Vec<BackendFailure> = Vec::new();
        let mut deadline_hit = false;

        for (index, adapter) in self.candidates.iter().enumerate() {
            let remaining = match self.deadline {
                Some(deadline) => {
                    let elapsed = started.elapsed();
                    if elapsed >= deadline {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            skipped = self.candidates.len() - index,
                            "Generation deadline passed, not starting further candidates"
                        );
                        return Err(Self::deadline_error(failures));
                    }
                    Some(deadline - elapsed)
                },
                None => None,
            };

            let request = GenerationRequest {
                backend: adapter.name(),
                canvas,
                mask,
                prompt,
                negative_prompt,
                params,
            };
            let span = spans::backend_attempt(adapter.name(), &adapter.model().to_string(), index + 1);
            let outcome = self
                .attempt(adapter.as_ref(), &request, remaining)
                .instrument(span)
                .await;

            match outcome {
                Ok(image) => {
                    info!(
                        backend = adapter.name(),
                        prior_failures = failures.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Generation succeeded"
                    );
                    return Ok(GenerationOutcome {
                        image,
                        backend: adapter.name().to_string(),
                        failures,
                    });
                },
                Err((failure, cut_by_deadline)) => {
                    events::backend_failure(&failure, self.candidates.len() - index - 1);
                    if let Some(reporter) = &self.reporter {
                        reporter.report_fallback(&failure);
                    }
                    failures.push(failure);
                    deadline_hit |= cut_by_deadline;
                },
            }
        }

        if deadline_hit {
            return Err(Self::deadline_error(failures));
        }
        let attempts = failures.len();
        match failures.pop() {
            Some(last) => Err(StudioError::AllBackendsExhausted { attempts, last }),
            None => Err(StudioError::invalid_config("no backend candidates were tried")),
        }
    }

    /// One candidate attempt
    ///
    /// A failure comes with whether the deadline cut it off. A request the
    /// adapter cannot build counts as that candidate's failure.
    async fn attempt(
        &self,
        adapter: &dyn BackendAdapter,
        request: &GenerationRequest<'_>,
        remaining: Option<Duration>,
    ) -> std::result::Result<ImageReference, (BackendFailure, bool)> {
        let input = adapter.adapt(request).map_err(|e| {
            (
                BackendFailure::new(
                    adapter.name(),
                    FailureKind::Transport,
                    format!("request could not be built: {}", e),
                ),
                false,
            )
        })?;
        let call = self.transport.run(adapter.model(), input);

        let output = match remaining {
            Some(budget) => match tokio::time::timeout(budget, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err((
                        BackendFailure::new(
                            adapter.name(),
                            FailureKind::Timeout,
                            format!(
                                "cut off by the generation deadline after {:.1}s",
                                budget.as_secs_f64()
                            ),
                        ),
                        true,
                    ));
                },
            },
            None => call.await,
        };

        output
            .map_err(|failure| failure.for_backend(adapter.name()))
            .and_then(|value| adapter.parse_response(&value))
            .map_err(|failure| (failure, false))
    }

    fn deadline_error(mut failures: Vec<BackendFailure>) -> StudioError {
        StudioError::GenerationDeadlineExceeded {
            attempts: failures.len(),
            last: failures.pop(),
        }
    }
}
