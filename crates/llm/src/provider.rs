//! Generation Provider Trait
//!
//! The single seam between the orchestration core and any model service.
//! Embedding is part of the same narrow interface rather than a separate
//! trait: the platform consumes exactly the operations listed here and the
//! provider owns transport concerns (timeouts, retries, cancellation).

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::types::{LlmError, LlmResult, TextStream};

/// Maximum retry attempts for transient failures (initial call not counted).
const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff.
const BACKOFF_BASE_MS: u64 = 250;

/// Unified interface over a text-generation + embedding service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name for logs and status reporting.
    fn name(&self) -> &'static str;

    /// Generate a complete response for `prompt` using `model`.
    async fn generate(&self, prompt: &str, model: &str) -> LlmResult<String>;

    /// Generate a streaming response; each item is a text delta.
    async fn generate_stream(&self, prompt: &str, model: &str) -> LlmResult<TextStream>;

    /// Embed `text` into a fixed-dimension vector using `model`.
    async fn embed(&self, text: &str, model: &str) -> LlmResult<Vec<f32>>;

    /// Verify the service is reachable. Used at startup in strict mode.
    async fn health_check(&self) -> LlmResult<()>;
}

/// Run `op` with up to [`MAX_RETRIES`] retries on transient errors, using
/// exponential backoff with jitter between attempts.
pub async fn with_retries<T, F, Fut>(label: &str, mut op: F) -> LlmResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = LlmResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                let jitter = rand::rng().random_range(0..backoff / 2 + 1);
                warn!(
                    target: "kestrel_llm",
                    "{} failed ({}), retry {}/{} in {}ms",
                    label, err, attempt, MAX_RETRIES, backoff + jitter
                );
                sleep(Duration::from_millis(backoff + jitter)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Network {
                        message: "connection reset".to_string(),
                    })
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: LlmResult<String> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(LlmError::ModelNotFound {
                    model: "missing".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
