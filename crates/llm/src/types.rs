//! Provider-Agnostic Types
//!
//! Error taxonomy and stream aliases shared by all generation providers.

use std::pin::Pin;

use futures_util::Stream;
use thiserror::Error;

/// Errors from a generation or embedding call.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// The provider is not reachable or not running.
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    /// The requested model was not found on the provider.
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// A network or connection error occurred; may be transient.
    #[error("network error: {message}")]
    Network { message: String },

    /// The provider returned an unexpected or unparseable response.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The call exceeded its deadline.
    #[error("generation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The call was cancelled by the caller.
    #[error("generation cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Network { .. })
    }
}

/// Result type alias for provider operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// A stream of text deltas from a streaming generation call.
pub type TextStream = Pin<Box<dyn Stream<Item = LlmResult<String>> + Send>>;
