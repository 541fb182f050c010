//! Kestrel LLM
//!
//! The narrow generation/embedding interface the platform consumes, plus the
//! Ollama-backed implementation. The core never talks to a model service
//! directly; it holds an `Arc<dyn GenerationProvider>` and calls `generate`,
//! `generate_stream`, or `embed`.
//!
//! Retries (max 2, exponential backoff with jitter on transient network
//! errors) and cancellation propagation are handled here, not by callers.

pub mod ollama;
pub mod provider;
pub mod types;

pub use ollama::OllamaProvider;
pub use provider::{with_retries, GenerationProvider};
pub use types::{LlmError, LlmResult, TextStream};
