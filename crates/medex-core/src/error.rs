//! Error types for medex.

use thiserror::Error;

/// Result type alias using medex's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medex operations.
///
/// The first four variants are admission errors: they are returned
/// synchronously by job submission and the job is never enqueued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The user already has a queued or running job.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The user's daily submission quota is exhausted.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Maintenance mode is active.
    #[error("Maintenance mode: {0}")]
    Maintenance(String),

    /// The circuit breaker is disabled and rejects new work.
    #[error("Service unavailable: {0}")]
    CircuitDisabled(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an admission rejection (never enqueued).
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_)
                | Error::QuotaExceeded(_)
                | Error::Maintenance(_)
                | Error::CircuitDisabled(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Errors raised by extraction collaborators (chunk extractor, full
/// extractor, refiner).
///
/// Messages must not carry transcript content.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractorError {
    /// The model-serving backend could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend call exceeded its deadline (milliseconds).
    #[error("Backend timed out after {0}ms")]
    Timeout(u64),

    /// The backend rejected the call due to rate limiting.
    #[error("Backend rate limited")]
    RateLimited,

    /// The backend answered but the output could not be parsed.
    #[error("Invalid model output: {0}")]
    ModelOutputInvalid(String),
}

impl ExtractorError {
    /// Stable type name, used verbatim in fallback reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorError::BackendUnavailable(_) => "BackendUnavailable",
            ExtractorError::Timeout(_) => "Timeout",
            ExtractorError::RateLimited => "RateLimited",
            ExtractorError::ModelOutputInvalid(_) => "ModelOutputInvalid",
        }
    }

    /// PHI-safe error code for logs and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractorError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            ExtractorError::Timeout(_) => "TIMEOUT",
            ExtractorError::RateLimited => "RATE_LIMITED",
            ExtractorError::ModelOutputInvalid(_) => "MODEL_ERROR",
        }
    }

    /// Whether a later retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractorError::ModelOutputInvalid(_))
    }
}
