//! Tracing configuration module for structured logging and observability
//!
//! Applications (the CLI) install a subscriber; the library itself only emits
//! spans and events through the helpers below.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors and emojis (default for CLI)
    Console,
    /// Compact console output for CI environments
    Compact,
    /// JSON structured logging for production environments
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-3+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for request correlation
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    ///
    /// Dependency crates (reqwest, hyper) stay at `warn` below trace level so
    /// that `-v` shows the studio's own decisions.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info,hyper=warn,reqwest=warn",
            1 => "debug,hyper=warn,reqwest=warn",
            _ => "trace",
        }
    }

    /// Initialize tracing subscriber based on configuration
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr);

                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "🚀 Studio session started");
        }

        Ok(())
    }
}

/// Convenience function to initialize tracing with CLI-friendly defaults
///
/// A non-empty `RUST_LOG` replaces the verbosity-derived filter. Returns the
/// generated session id so callers can attach it to the session span.
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<String> {
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(session_id.clone());
    if let Some(filter) = env_filter_override(std::env::var("RUST_LOG").ok()) {
        config = config.with_env_filter(filter);
    }

    config.init()?;
    Ok(session_id)
}

/// Filter taken from the environment, ignoring blank values
fn env_filter_override(value: Option<String>) -> Option<String> {
    value.filter(|filter| !filter.trim().is_empty())
}

/// Span creation helpers for common operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one whole composition run
    pub fn session(session_id: &str, product_type: &str, scene: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            session_id = %session_id,
            product_type = %product_type,
            scene = %scene
        )
    }

    pub fn normalization(original_size: (u32, u32), target_size: u32) -> Span {
        tracing::span!(
            Level::DEBUG,
            "normalization",
            original_width = %original_size.0,
            original_height = %original_size.1,
            target_size = %target_size
        )
    }

    pub fn isolation(segmenter: &str, canvas_size: u32) -> Span {
        tracing::span!(
            Level::DEBUG,
            "isolation",
            segmenter = %segmenter,
            canvas_size = %canvas_size
        )
    }

    /// Span for one generation candidate attempt
    pub fn backend_attempt(backend: &str, model: &str, attempt: usize) -> Span {
        tracing::span!(
            Level::INFO,
            "backend_attempt",
            backend = %backend,
            model = %model,
            attempt = %attempt
        )
    }

    pub fn download(reference: &str) -> Span {
        tracing::span!(Level::DEBUG, "download", reference = %reference)
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use crate::error::BackendFailure;
    use tracing::{debug, error, info, warn};

    /// Log a user-facing progress message
    pub fn progress(message: &str, emoji: &str) {
        info!("{} {}", emoji, message);
    }

    /// Log an error with context
    pub fn error_with_context(error: &dyn std::error::Error, context: &str) {
        error!(
            error = %error,
            context = %context,
            "❌ Operation failed"
        );
    }

    /// Log a failed candidate before falling back to the next one
    pub fn backend_failure(failure: &BackendFailure, remaining_candidates: usize) {
        warn!(
            backend = %failure.backend,
            kind = %failure.kind,
            message = %failure.message,
            remaining_candidates = %remaining_candidates,
            "⚠️  Backend attempt failed"
        );
    }

    /// Log performance metrics
    pub fn performance_metric(operation: &str, duration_ms: u64) {
        debug!(
            operation = %operation,
            duration_ms = %duration_ms,
            "⏱️  Performance metric"
        );
    }
}
