//! Test Harness
//!
//! Builds a fully wired `RunEngine` on top of a temp data directory with
//! small prebuilt corpus indices and a scripted generation provider, so the
//! whole pipeline runs without a model service.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kestrel::cache::Cache;
use kestrel::config::KestrelConfig;
use kestrel::evidence::EvidenceStore;
use kestrel::memory::CollaborationMemory;
use kestrel::run::RunEngine;
use kestrel::workers::WorkerRegistry;
use kestrel_llm::{GenerationProvider, LlmError, LlmResult, TextStream};
use serde_json::json;
use tempfile::TempDir;

/// Scripted provider: routes prompts by shape instead of order, so the
/// concurrent worker calls stay deterministic. Reflection responses pop from
/// a queue to drive the re-run loop.
pub struct StubProvider {
    reflections: Mutex<VecDeque<String>>,
    synthesis_calls: AtomicUsize,
    pub generate_delay: Duration,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            reflections: Mutex::new(VecDeque::new()),
            synthesis_calls: AtomicUsize::new(0),
            generate_delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    /// Queue a reflection response; once drained, a confident default is
    /// returned.
    pub fn push_reflection(&self, confidence: f64, rerun: &[&str]) {
        let response = json!({
            "confidence": confidence,
            "contradictions": [],
            "rerun": rerun,
            "summary": "scripted reflection",
        })
        .to_string();
        self.reflections.lock().unwrap().push_back(response);
    }

    fn answer(&self, prompt: &str) -> String {
        if prompt.contains("reflection layer") {
            return self
                .reflections
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    json!({
                        "confidence": 0.92,
                        "contradictions": [],
                        "rerun": [],
                        "summary": "consistent"
                    })
                    .to_string()
                });
        }
        if prompt.contains("consistency") {
            return json!({
                "contradictions": [],
                "alignment_summary": "structural and event data align",
                "overall_stability": "Fragile"
            })
            .to_string();
        }
        "worker finding: conditions remain volatile in the area of interest".to_string()
    }
}

#[async_trait]
impl GenerationProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn generate(&self, prompt: &str, _model: &str) -> LlmResult<String> {
        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }
        Ok(self.answer(prompt))
    }

    async fn generate_stream(&self, _prompt: &str, _model: &str) -> LlmResult<TextStream> {
        let n = self.synthesis_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let text = format!("Brief {}: the assessed situation is developing. ", n);
        let chunks: Vec<LlmResult<String>> = text
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn embed(&self, text: &str, _model: &str) -> LlmResult<Vec<f32>> {
        let mut v = vec![1.0f32; 8];
        v[text.len() % 8] += 0.5;
        Ok(v)
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }
}

/// Provider whose every call fails; for degradation paths.
pub struct DownProvider;

#[async_trait]
impl GenerationProvider for DownProvider {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn generate(&self, _prompt: &str, _model: &str) -> LlmResult<String> {
        Err(LlmError::ProviderUnavailable {
            message: "down".to_string(),
        })
    }

    async fn generate_stream(&self, _prompt: &str, _model: &str) -> LlmResult<TextStream> {
        Err(LlmError::ProviderUnavailable {
            message: "down".to_string(),
        })
    }

    async fn embed(&self, _text: &str, _model: &str) -> LlmResult<Vec<f32>> {
        Err(LlmError::ProviderUnavailable {
            message: "down".to_string(),
        })
    }

    async fn health_check(&self) -> LlmResult<()> {
        Err(LlmError::ProviderUnavailable {
            message: "down".to_string(),
        })
    }
}

/// Write a small corpus index under the harness data dir.
fn write_corpus(dir: &TempDir, corpus_id: &str, docs: serde_json::Value) {
    let corpus_dir = dir.path().join("data/vector_index").join(corpus_id);
    std::fs::create_dir_all(&corpus_dir).unwrap();
    std::fs::write(corpus_dir.join("index.json"), docs.to_string()).unwrap();
}

fn doc(id: &str, text: &str, metadata: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "text": text,
        "embedding": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
        "metadata": metadata,
    })
}

/// A wired engine plus the temp dir keeping its state alive.
pub struct Harness {
    pub engine: Arc<RunEngine>,
    pub config: Arc<KestrelConfig>,
    _dir: TempDir,
}

/// Build a harness. `skip_corpora` lists corpora whose index is deliberately
/// left unbuilt.
pub fn harness_with(provider: Arc<dyn GenerationProvider>, skip_corpora: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    for corpus in ["ACLED", "CIA_FACTS", "FREEDOM_WORLD", "IMF", "WBI"] {
        if skip_corpora.contains(&corpus) {
            continue;
        }
        let docs = match corpus {
            "ACLED" => json!([
                doc("e1", "armed clashes near the capital", json!({"country": "Sudan", "event_type": "battle", "year": 2024})),
                doc("e2", "protest dispersed with force", json!({"country": "Sudan", "event_type": "riot", "year": 2025})),
            ]),
            "IMF" => json!([
                doc("i1", "gdp contracted sharply last year", json!({"country": "Sudan", "year": 2024})),
            ]),
            other => json!([
                doc(
                    &format!("{}-1", other.to_lowercase()),
                    &format!("structural background from {}", other),
                    json!({"country": "Sudan"})
                ),
            ]),
        };
        write_corpus(&dir, corpus, docs);
    }

    let mut config = KestrelConfig::default();
    config.data_dir = dir.path().join("data");
    config.thresholds.run_deadline_ms = 10_000;
    config.thresholds.grace_ms = 500;
    let config = Arc::new(config);

    let cache = Arc::new(Cache::new(
        config.cache_dir(),
        Duration::from_secs(config.cache.websearch_ttl_secs),
    ));
    let store = Arc::new(EvidenceStore::open(&config, provider.clone(), cache.clone()));
    let registry = Arc::new(WorkerRegistry::from_config(
        &config,
        provider.clone(),
        cache.clone(),
    ));
    let memory = Arc::new(CollaborationMemory::open(&config.memory_log_path()).unwrap());

    let engine = Arc::new(RunEngine::new(
        config.clone(),
        provider,
        cache,
        store,
        registry,
        memory,
    ));

    Harness {
        engine,
        config,
        _dir: dir,
    }
}

pub fn harness(provider: Arc<dyn GenerationProvider>) -> Harness {
    harness_with(provider, &[])
}
