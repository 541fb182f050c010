//! Core Error Types
//!
//! The minimal error set shared by every crate in the workspace. The
//! application crate extends these with variants that require heavier
//! dependencies (HTTP, storage, generation providers).

use thiserror::Error;

/// Core error type for the Kestrel workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

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

    /// An internal invariant was violated
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
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
}
