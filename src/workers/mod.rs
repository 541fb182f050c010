//! Worker Contract
//!
//! Every specialist worker implements the same surface: a stable id, an
//! evidence requirement flag, and a single `run` call receiving the query,
//! optional fused evidence, a progress emitter, and a cancellation token.
//! Workers never mutate their inputs and never call each other; all
//! cross-worker information flow is mediated by the executor and the
//! synthesis stage.

pub mod analyst;
pub mod code;
pub mod geo;
pub mod redactor;
pub mod registry;
pub mod search;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kestrel_core::events::RunEvent;
use kestrel_core::types::{FusedEvidence, WorkerErrorKind, WorkerId, WorkerResult};
use kestrel_llm::{GenerationProvider, LlmError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{cached_generate, Cache};

pub use registry::WorkerRegistry;

/// Emits `worker_progress` events on behalf of one worker. Send failures
/// (client gone, channel closed) are ignored; progress is best-effort.
#[derive(Clone)]
pub struct ProgressSender {
    worker: WorkerId,
    tx: mpsc::Sender<RunEvent>,
}

impl ProgressSender {
    pub fn new(worker: WorkerId, tx: mpsc::Sender<RunEvent>) -> Self {
        Self { worker, tx }
    }

    pub async fn emit(&self, text: impl Into<String>) {
        let _ = self
            .tx
            .send(RunEvent::WorkerProgress {
                worker: self.worker,
                text: text.into(),
            })
            .await;
    }
}

/// Everything a worker receives for one invocation.
#[derive(Clone)]
pub struct WorkerContext {
    pub query: String,
    /// Fused evidence; `None` for workers with `requires_evidence() == false`.
    pub evidence: Option<Arc<FusedEvidence>>,
    pub progress: ProgressSender,
    pub cancel: CancellationToken,
}

/// Uniform invocation surface over heterogeneous specialist workers.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable symbolic identifier.
    fn id(&self) -> WorkerId;

    /// Whether the executor should pass fused evidence into `run`.
    fn requires_evidence(&self) -> bool;

    /// Execute against the context. Implementations check the cancellation
    /// token at suspension points and return promptly when it fires; the
    /// executor enforces the hard deadline.
    async fn run(&self, ctx: WorkerContext) -> WorkerResult;
}

/// Stopwatch for `duration_ms` accounting.
pub(crate) struct WorkerClock(Instant);

impl WorkerClock {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

/// Run a cached generation call under the worker's cancellation token.
/// Returns an error result ready to hand back when the call fails or the
/// token fires first.
pub(crate) async fn generate_with_cancel(
    worker: WorkerId,
    ctx: &WorkerContext,
    cache: &Cache,
    provider: &Arc<dyn GenerationProvider>,
    prompt: &str,
    model: &str,
    clock: &WorkerClock,
) -> Result<String, WorkerResult> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(WorkerResult::error(
            worker,
            WorkerErrorKind::Cancelled,
            "cancelled before generation completed",
            clock.elapsed_ms(),
        )),
        generated = cached_generate(cache, provider, prompt, model) => {
            generated.map_err(|e| {
                let kind = match e {
                    LlmError::ProviderUnavailable { .. } => WorkerErrorKind::GenerationUnavailable,
                    LlmError::Timeout { .. } => WorkerErrorKind::Timeout,
                    LlmError::Cancelled => WorkerErrorKind::Cancelled,
                    _ => WorkerErrorKind::Failed,
                };
                WorkerResult::error(worker, kind, e.to_string(), clock.elapsed_ms())
            })
        }
    }
}

/// Render the top of a fused evidence list as numbered context lines,
/// bounded by `char_budget`. The cut point is always a record boundary.
pub(crate) fn render_evidence(evidence: &FusedEvidence, char_budget: usize) -> String {
    let mut out = String::new();
    for (i, record) in evidence.records.iter().enumerate() {
        let line = format!(
            "{}. [{} w={:.2}] {}\n",
            i + 1,
            record.corpus_id,
            record.weighted_score(),
            record.text
        );
        if out.len() + line.len() > char_budget {
            break;
        }
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared test doubles for worker and engine tests.

    use super::*;
    use kestrel_llm::{LlmResult, TextStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A provider that replies from a fixed script, or fails when configured
    /// as unavailable. Streaming splits the reply into word chunks.
    pub struct ScriptedProvider {
        pub replies: Vec<String>,
        pub unavailable: bool,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: replies.into_iter().map(String::from).collect(),
                unavailable: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn unavailable() -> Self {
            Self {
                replies: Vec::new(),
                unavailable: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_reply(&self) -> String {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .get(n.min(self.replies.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_else(|| "scripted reply".to_string())
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(&self, _prompt: &str, _model: &str) -> LlmResult<String> {
            if self.unavailable {
                return Err(LlmError::ProviderUnavailable {
                    message: "scripted outage".to_string(),
                });
            }
            Ok(self.next_reply())
        }

        async fn generate_stream(&self, _prompt: &str, _model: &str) -> LlmResult<TextStream> {
            if self.unavailable {
                return Err(LlmError::ProviderUnavailable {
                    message: "scripted outage".to_string(),
                });
            }
            let reply = self.next_reply();
            let chunks: Vec<LlmResult<String>> = reply
                .split_inclusive(' ')
                .map(|s| Ok(s.to_string()))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }

        async fn embed(&self, text: &str, _model: &str) -> LlmResult<Vec<f32>> {
            if self.unavailable {
                return Err(LlmError::ProviderUnavailable {
                    message: "scripted outage".to_string(),
                });
            }
            // Cheap deterministic embedding: character-class histogram.
            let mut v = vec![0.0f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[(b as usize + i) % 8] += 1.0;
            }
            Ok(v)
        }

        async fn health_check(&self) -> LlmResult<()> {
            if self.unavailable {
                return Err(LlmError::ProviderUnavailable {
                    message: "scripted outage".to_string(),
                });
            }
            Ok(())
        }
    }

    /// Build a WorkerContext wired to a throwaway progress channel.
    pub fn context(query: &str, evidence: Option<FusedEvidence>) -> WorkerContext {
        // Progress sends fail silently once the receiver drops, which is
        // exactly what these tests want.
        let (tx, _rx) = mpsc::channel(64);
        WorkerContext {
            query: query.to_string(),
            evidence: evidence.map(Arc::new),
            progress: ProgressSender::new(WorkerId::Analyst, tx),
            cancel: CancellationToken::new(),
        }
    }
}
