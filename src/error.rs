//! Error Handling
//!
//! Application-wide error type extending the workspace core errors with
//! variants that require heavier dependencies (providers, storage, HTTP).

use kestrel_core::CoreError;
use kestrel_llm::LlmError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Errors bubbled up from the core crate
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration missing or malformed; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// A requested evidence corpus is not built or not loadable
    #[error("evidence unavailable for corpus '{corpus}': {message}")]
    EvidenceUnavailable { corpus: String, message: String },

    /// Generation or embedding service failure
    #[error("generation error: {0}")]
    Llm(#[from] LlmError),

    /// The overall run deadline expired
    #[error("run deadline exceeded after {elapsed_ms}ms")]
    RunDeadlineExceeded { elapsed_ms: u64 },

    /// The streaming client went away
    #[error("client disconnected")]
    ClientDisconnect,

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("not found: {0}")]
    NotFound(String),

    /// An invariant was violated; fatal to the run
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error-kind string for the wire protocol and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_invalid",
            AppError::EvidenceUnavailable { .. } => "corpus_unavailable",
            AppError::Llm(LlmError::ProviderUnavailable { .. }) => "generation_unavailable",
            AppError::Llm(LlmError::Timeout { .. }) => "generation_timeout",
            AppError::Llm(_) => "generation_error",
            AppError::RunDeadlineExceeded { .. } => "run_deadline_exceeded",
            AppError::ClientDisconnect => "client_disconnect",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) | AppError::Core(CoreError::Internal(_)) => "internal",
            _ => "error",
        }
    }
}
