//! Error types for studio composition operations

use std::fmt;
use thiserror::Error;

/// Result type alias for studio operations
pub type Result<T> = std::result::Result<T, StudioError>;

/// Classification of a single failed backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The call did not complete within its time budget
    Timeout,
    /// The backend answered with a non-2xx status code
    HttpStatus(u16),
    /// The response body could not be interpreted
    MalformedResponse,
    /// The response was well-formed but carried no image
    EmptyOutput,
    /// The backend accepted the job but reported it failed or canceled
    PredictionFailed,
    /// Connection-level or request construction failure
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::HttpStatus(code) => write!(f, "HTTP {}", code),
            Self::MalformedResponse => write!(f, "malformed response"),
            Self::EmptyOutput => write!(f, "empty output"),
            Self::PredictionFailed => write!(f, "prediction failed"),
            Self::Transport => write!(f, "transport error"),
        }
    }
}

/// A failed attempt against one backend candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    /// Name of the backend candidate that failed
    pub backend: String,
    /// What went wrong
    pub kind: FailureKind,
    /// Backend- or transport-supplied detail
    pub message: String,
}

impl BackendFailure {
    pub fn new<B: Into<String>, M: Into<String>>(backend: B, kind: FailureKind, message: M) -> Self {
        Self {
            backend: backend.into(),
            kind,
            message: message.into(),
        }
    }

    /// Re-attribute a transport failure to the candidate that triggered it
    #[must_use]
    pub fn for_backend<B: Into<String>>(mut self, backend: B) -> Self {
        self.backend = backend.into();
        self
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.backend, self.kind, self.message)
    }
}

impl std::error::Error for BackendFailure {}

/// Coarse failure categories shown to the person running a composition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The uploaded image could not be used
    InvalidInput,
    /// The subject could not be separated from its background
    IsolationFailed,
    /// No generation backend produced an image
    BackendsUnavailable,
    /// Configuration or credential problem
    Configuration,
    /// Anything else
    Internal,
}

/// Comprehensive error types for studio composition operations
#[derive(Error, Debug)]
pub enum StudioError {
    /// Source image is malformed, empty or undecodable
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Segmentation backend unavailable or returned unusable output
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Every backend candidate was tried and failed
    #[error("All {attempts} generation backend(s) failed; last failure: {last}")]
    AllBackendsExhausted { attempts: usize, last: BackendFailure },

    /// The total generation budget ran out before a candidate succeeded
    #[error("Generation deadline exceeded after {attempts} attempt(s){}", last_failure_suffix(.last.as_ref()))]
    GenerationDeadlineExceeded {
        attempts: usize,
        last: Option<BackendFailure>,
    },

    /// Authentication token absent or empty
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client errors outside a backend attempt
    #[error("Network error: {0}")]
    Network(String),
}

fn last_failure_suffix(last: Option<&BackendFailure>) -> String {
    match last {
        Some(failure) => format!("; last failure: {}", failure),
        None => String::new(),
    }
}

impl StudioError {
    /// Create a new invalid image error
    pub fn invalid_image<S: Into<String>>(msg: S) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new missing credential error
    pub fn missing_credential<S: Into<String>>(msg: S) -> Self {
        Self::MissingCredential(msg.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    #[must_use]
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::InvalidImage(_) | Self::Image(_) => FailureCategory::InvalidInput,
            Self::Segmentation(_) => FailureCategory::IsolationFailed,
            Self::AllBackendsExhausted { .. }
            | Self::GenerationDeadlineExceeded { .. }
            | Self::Network(_) => FailureCategory::BackendsUnavailable,
            Self::MissingCredential(_) | Self::InvalidConfig(_) => FailureCategory::Configuration,
            Self::Io(_) | Self::Serialization(_) => FailureCategory::Internal,
        }
    }

    /// Human-readable reason that tells the caller what to fix
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.category() {
            FailureCategory::InvalidInput => {
                format!("Your input image could not be used: {}", self)
            },
            FailureCategory::IsolationFailed => {
                format!("The product could not be isolated from its background: {}", self)
            },
            FailureCategory::BackendsUnavailable => format!(
                "All generation backends are currently unavailable, please retry later: {}",
                self
            ),
            FailureCategory::Configuration => {
                format!("The studio is not configured correctly: {}", self)
            },
            FailureCategory::Internal => format!("Unexpected internal error: {}", self),
        }
    }
}
