//! Configuration Management
//!
//! One JSON document declares everything the platform needs: evidence
//! corpora with reliability weights, worker model assignments, run
//! thresholds, generation endpoints, cache policy, and the server surface.
//! Loaded once at startup and treated as immutable for the process lifetime.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kestrel_core::types::{WorkerId, CANONICAL_WORKER_ORDER};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Default config file location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/kestrel.json";

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KestrelConfig {
    /// Root for all persisted state (indices, analysis, memory, cache, maps).
    pub data_dir: PathBuf,
    pub corpora: Vec<CorpusConfig>,
    pub workers: Vec<WorkerConfig>,
    pub thresholds: Thresholds,
    pub generation: GenerationConfig,
    pub cache: CachePolicy,
    pub server: ServerConfig,
}

/// One evidence corpus: a named vector index with a fixed reliability weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub id: String,
    /// Index directory relative to `data_dir/vector_index`, defaults to `id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Multiplier applied to similarity scores during fusion, in (0, 1].
    pub reliability_weight: f32,
    /// Thematic tags (conflict, economy, events, structural, ...).
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One worker: model assignment and execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: WorkerId,
    pub model: String,
    pub requires_evidence: bool,
    #[serde(default = "default_worker_timeout_ms")]
    pub timeout_ms: u64,
}

/// Run-level thresholds and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Reflection confidence at or above which the run terminates.
    pub confidence_floor: f32,
    /// Maximum synthesis/reflection iterations per run.
    pub max_iterations: u32,
    /// Upper bound on concurrently executing workers.
    pub max_parallel: usize,
    /// Overall run deadline.
    pub run_deadline_ms: u64,
    /// Grace window after cancellation before hard termination.
    pub grace_ms: u64,
    /// Embedding call timeout inside the evidence store.
    pub embed_timeout_ms: u64,
    /// Character budget for evidence in the synthesis prompt.
    pub evidence_char_budget: usize,
    /// Records retrieved per corpus per query.
    pub retrieval_top_k: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence_floor: 0.7,
            max_iterations: 2,
            max_parallel: 3,
            run_deadline_ms: 120_000,
            grace_ms: 2_000,
            embed_timeout_ms: 5_000,
            evidence_char_budget: 8_000,
            retrieval_top_k: 5,
        }
    }
}

/// Generation/embedding service endpoints and model defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    /// Fallback model for workers without an explicit assignment.
    pub default_model: String,
    pub embed_model: String,
    /// Model id advertised on the chat-completions facade.
    pub facade_model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "magistral:latest".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            facade_model: "kestrel".to_string(),
        }
    }
}

/// Cache freshness policy, per cache kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Freshness bound for web retrievals; evidence and embeddings never expire.
    pub websearch_ttl_secs: u64,
    /// Soft cap on total cache size; oldest shards are pruned past it.
    pub size_cap_bytes: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            websearch_ttl_secs: 3_600,
            size_cap_bytes: 512 * 1024 * 1024,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8600".to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:3001".to_string(),
                "http://127.0.0.1:3001".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://localhost:5174".to_string(),
                "http://127.0.0.1:5174".to_string(),
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
        }
    }
}

fn default_worker_timeout_ms() -> u64 {
    60_000
}

impl Default for KestrelConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            corpora: vec![
                CorpusConfig {
                    id: "ACLED".to_string(),
                    path: None,
                    reliability_weight: 0.5,
                    tags: vec!["conflict".to_string(), "events".to_string()],
                },
                CorpusConfig {
                    id: "CIA_FACTS".to_string(),
                    path: None,
                    reliability_weight: 0.6,
                    tags: vec!["structural".to_string()],
                },
                CorpusConfig {
                    id: "FREEDOM_WORLD".to_string(),
                    path: None,
                    reliability_weight: 0.6,
                    tags: vec!["governance".to_string(), "structural".to_string()],
                },
                CorpusConfig {
                    id: "IMF".to_string(),
                    path: None,
                    reliability_weight: 0.75,
                    tags: vec!["economy".to_string(), "structural".to_string()],
                },
                CorpusConfig {
                    id: "WBI".to_string(),
                    path: None,
                    reliability_weight: 0.7,
                    tags: vec!["development".to_string(), "structural".to_string()],
                },
            ],
            workers: CANONICAL_WORKER_ORDER
                .iter()
                .chain(std::iter::once(&WorkerId::Reflection))
                .map(|&id| WorkerConfig {
                    id,
                    model: "magistral:latest".to_string(),
                    requires_evidence: matches!(id, WorkerId::Analyst | WorkerId::Geo),
                    timeout_ms: default_worker_timeout_ms(),
                })
                .collect(),
            thresholds: Thresholds::default(),
            generation: GenerationConfig::default(),
            cache: CachePolicy::default(),
            server: ServerConfig::default(),
        }
    }
}

impl KestrelConfig {
    /// Load configuration from `path`, or fall back to defaults (writing them
    /// out) when the file does not exist.
    pub fn load_or_default(path: &Path) -> AppResult<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: KestrelConfig = serde_json::from_str(&content)
                .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?;
            config
        } else {
            let config = KestrelConfig::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(&config)?)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate structural constraints. Weights must be finite and in (0, 1],
    /// corpus ids unique, every routable worker configured, thresholds sane.
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = std::collections::HashSet::new();
        for corpus in &self.corpora {
            if corpus.id.trim().is_empty() {
                return Err(AppError::config("corpus with empty id"));
            }
            if !seen.insert(corpus.id.clone()) {
                return Err(AppError::config(format!("duplicate corpus id '{}'", corpus.id)));
            }
            let w = corpus.reliability_weight;
            if !w.is_finite() || w <= 0.0 || w > 1.0 {
                return Err(AppError::config(format!(
                    "corpus '{}' reliability_weight {} outside (0, 1]",
                    corpus.id, w
                )));
            }
        }
        for id in CANONICAL_WORKER_ORDER {
            if self.worker(id).is_none() {
                return Err(AppError::config(format!("worker '{}' is not configured", id)));
            }
        }
        if self.thresholds.max_iterations == 0 {
            return Err(AppError::config("max_iterations must be at least 1"));
        }
        if self.thresholds.max_parallel == 0 {
            return Err(AppError::config("max_parallel must be at least 1"));
        }
        let floor = self.thresholds.confidence_floor;
        if !(0.0..=1.0).contains(&floor) {
            return Err(AppError::config(format!(
                "confidence_floor {} outside [0, 1]",
                floor
            )));
        }
        Ok(())
    }

    /// Look up a worker's configuration.
    pub fn worker(&self, id: WorkerId) -> Option<&WorkerConfig> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// Model assigned to a worker, falling back to the generation default.
    pub fn worker_model(&self, id: WorkerId) -> &str {
        self.worker(id)
            .map(|w| w.model.as_str())
            .unwrap_or(&self.generation.default_model)
    }

    /// Corpus id -> reliability weight map used by fusion.
    pub fn reliability_weights(&self) -> HashMap<String, f32> {
        self.corpora
            .iter()
            .map(|c| (c.id.clone(), c.reliability_weight))
            .collect()
    }

    /// Directory holding a corpus's vector index files.
    pub fn corpus_index_dir(&self, corpus: &CorpusConfig) -> PathBuf {
        let leaf = corpus.path.as_deref().unwrap_or(&corpus.id);
        self.data_dir.join("vector_index").join(leaf)
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.data_dir.join("analysis")
    }

    pub fn memory_log_path(&self) -> PathBuf {
        self.data_dir.join("memory").join("collaboration.log")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}
