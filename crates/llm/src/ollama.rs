//! Ollama Provider
//!
//! `GenerationProvider` implementation for local Ollama inference using the
//! ollama-rs native SDK. Runs entirely locally, requires no API key, and
//! supports streaming chat generation and batch-capable embeddings via the
//! `/api/embed` endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use tracing::debug;

use crate::provider::{with_retries, GenerationProvider};
use crate::types::{LlmError, LlmResult, TextStream};

/// Default Ollama API endpoint.
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Ollama provider for local inference.
pub struct OllamaProvider {
    client: Ollama,
    base_url: String,
}

impl OllamaProvider {
    /// Create a provider pointed at `base_url` (falls back to the default
    /// local endpoint when `None`).
    pub fn new(base_url: Option<&str>) -> Self {
        let base_url = base_url.unwrap_or(OLLAMA_DEFAULT_URL).to_string();
        let client = Self::create_client(&base_url);
        Self { client, base_url }
    }

    /// Create an Ollama SDK client from a base URL string.
    ///
    /// Parses the URL to extract host and port for `Ollama::new()`.
    /// Falls back to `Ollama::default()` if parsing fails.
    fn create_client(base_url: &str) -> Ollama {
        if let Ok(parsed) = url::Url::parse(base_url) {
            let scheme = parsed.scheme();
            let host = parsed.host_str().unwrap_or("localhost");
            let port = parsed.port().unwrap_or(11434);
            let host_url = format!("{}://{}", scheme, host);
            Ollama::new(host_url, port)
        } else {
            Ollama::default()
        }
    }

    /// Map an ollama-rs error to our `LlmError` taxonomy.
    fn map_error(&self, err: ollama_rs::error::OllamaError, model: &str) -> LlmError {
        let msg = err.to_string();
        if msg.contains("connect") || msg.contains("Connection refused") {
            LlmError::ProviderUnavailable {
                message: format!(
                    "cannot connect to Ollama at {}: {}. Is the server running?",
                    self.base_url, msg
                ),
            }
        } else if msg.contains("not found") || msg.contains("404") {
            LlmError::ModelNotFound {
                model: model.to_string(),
            }
        } else {
            LlmError::Network { message: msg }
        }
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, prompt: &str, model: &str) -> LlmResult<String> {
        with_retries("generate", || {
            let request = ChatMessageRequest::new(
                model.to_string(),
                vec![ChatMessage::user(prompt.to_string())],
            );
            async move {
                let response = self
                    .client
                    .send_chat_messages(request)
                    .await
                    .map_err(|e| self.map_error(e, model))?;
                Ok(response.message.content)
            }
        })
        .await
    }

    async fn generate_stream(&self, prompt: &str, model: &str) -> LlmResult<TextStream> {
        let request = ChatMessageRequest::new(
            model.to_string(),
            vec![ChatMessage::user(prompt.to_string())],
        );

        let stream = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| self.map_error(e, model))?;

        debug!(target: "kestrel_llm", model, "opened streaming generation");

        // Each chunk carries the delta in message.content; empty deltas
        // (final bookkeeping chunks) are filtered out.
        let mapped = stream.filter_map(|chunk| async move {
            match chunk {
                Ok(response) => {
                    let delta = response.message.content;
                    if delta.is_empty() {
                        None
                    } else {
                        Some(Ok(delta))
                    }
                }
                Err(_) => Some(Err(LlmError::Network {
                    message: "stream error from Ollama".to_string(),
                })),
            }
        });

        Ok(Box::pin(mapped))
    }

    async fn embed(&self, text: &str, model: &str) -> LlmResult<Vec<f32>> {
        with_retries("embed", || {
            let request = GenerateEmbeddingsRequest::new(
                model.to_string(),
                EmbeddingsInput::from(text),
            );
            async move {
                let response = self
                    .client
                    .generate_embeddings(request)
                    .await
                    .map_err(|e| self.map_error(e, model))?;
                response
                    .embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| LlmError::Parse {
                        message: "Ollama returned empty embeddings".to_string(),
                    })
            }
        })
        .await
    }

    async fn health_check(&self) -> LlmResult<()> {
        self.client
            .list_local_models()
            .await
            .map(|_| ())
            .map_err(|e| self.map_error(e, ""))
    }
}
