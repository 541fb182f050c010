//! Evidence Store
//!
//! Uniform similarity retrieval over the configured corpora. Each corpus is
//! an independent dense vector index; the query is embedded once per call and
//! probed against every requested corpus. Duplicate content across corpora is
//! not deduplicated here — that is fusion's job.
//!
//! Degradation rules: a corpus whose index is not built yields
//! `EvidenceUnavailable` from `retrieve`, which the multi-corpus path
//! converts into an empty result with a warning so the run continues; an
//! embedder timeout yields an empty result with a warning unless strict mode
//! was requested.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use kestrel_core::types::EvidenceRecord;
use kestrel_llm::{GenerationProvider, LlmError};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{Cache, CacheKind};
use crate::config::{CorpusConfig, KestrelConfig};
use crate::error::{AppError, AppResult};
use crate::evidence::index::CorpusIndex;

/// Metadata returned by `list_corpora`.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusMeta {
    pub reliability_weight: f32,
    pub tags: Vec<String>,
    pub loaded: bool,
    pub documents: usize,
}

struct LoadedCorpus {
    config: CorpusConfig,
    index: Option<CorpusIndex>,
}

/// Read-only retrieval service over all configured corpora.
pub struct EvidenceStore {
    corpora: BTreeMap<String, LoadedCorpus>,
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    embed_model: String,
    embed_timeout: Duration,
}

impl EvidenceStore {
    /// Open the store, attempting to load every configured corpus index.
    /// Missing indices are tolerated here and surface per-retrieval.
    pub fn open(
        config: &KestrelConfig,
        provider: Arc<dyn GenerationProvider>,
        cache: Arc<Cache>,
    ) -> Self {
        let mut corpora = BTreeMap::new();
        for corpus in &config.corpora {
            let dir = config.corpus_index_dir(corpus);
            let index = match CorpusIndex::load(&dir, &corpus.id) {
                Ok(index) => {
                    info!(
                        target: "kestrel_evidence",
                        corpus = %corpus.id,
                        documents = index.len(),
                        "loaded corpus index"
                    );
                    Some(index)
                }
                Err(e) => {
                    warn!(
                        target: "kestrel_evidence",
                        corpus = %corpus.id,
                        "corpus index unavailable: {}", e
                    );
                    None
                }
            };
            corpora.insert(
                corpus.id.clone(),
                LoadedCorpus {
                    config: corpus.clone(),
                    index,
                },
            );
        }
        Self {
            corpora,
            provider,
            cache,
            embed_model: config.generation.embed_model.clone(),
            embed_timeout: Duration::from_millis(config.thresholds.embed_timeout_ms),
        }
    }

    /// Corpus id -> metadata for every configured corpus.
    pub fn list_corpora(&self) -> BTreeMap<String, CorpusMeta> {
        self.corpora
            .iter()
            .map(|(id, corpus)| {
                (
                    id.clone(),
                    CorpusMeta {
                        reliability_weight: corpus.config.reliability_weight,
                        tags: corpus.config.tags.clone(),
                        loaded: corpus.index.is_some(),
                        documents: corpus.index.as_ref().map(CorpusIndex::len).unwrap_or(0),
                    },
                )
            })
            .collect()
    }

    /// Tags configured for a corpus, if it exists.
    pub fn corpus_tags(&self, corpus_id: &str) -> Option<&[String]> {
        self.corpora
            .get(corpus_id)
            .map(|c| c.config.tags.as_slice())
    }

    /// Embed the query text, going through the cache. A timeout or embedder
    /// failure returns `None` (logged) unless `strict`, which errors.
    async fn embed_query(&self, query: &str, strict: bool) -> AppResult<Option<Vec<f32>>> {
        let cache_key = format!("{}\u{1f}{}", self.embed_model, query);
        if let Some(vector) = self
            .cache
            .get_json::<Vec<f32>>(CacheKind::Embed, &cache_key)
            .await
        {
            return Ok(Some(vector));
        }

        let embedded =
            tokio::time::timeout(self.embed_timeout, self.provider.embed(query, &self.embed_model))
                .await;

        let vector = match embedded {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                if strict {
                    return Err(AppError::Llm(e));
                }
                warn!(target: "kestrel_evidence", "embedder failed, returning no evidence: {}", e);
                return Ok(None);
            }
            Err(_) => {
                if strict {
                    return Err(AppError::Llm(LlmError::Timeout {
                        elapsed_ms: self.embed_timeout.as_millis() as u64,
                    }));
                }
                warn!(
                    target: "kestrel_evidence",
                    timeout_ms = self.embed_timeout.as_millis() as u64,
                    "embedder timed out, returning no evidence"
                );
                return Ok(None);
            }
        };

        if let Err(e) = self.cache.put_json(CacheKind::Embed, &cache_key, &vector).await {
            warn!(target: "kestrel_evidence", "failed to cache embedding: {}", e);
        }
        Ok(Some(vector))
    }

    /// Retrieve up to `top_k` records from one corpus, best match first.
    ///
    /// Fails with `EvidenceUnavailable` when the corpus is unknown or its
    /// index is not built. Retrieval is deterministic for identical index
    /// state and query.
    pub async fn retrieve(
        &self,
        query: &str,
        corpus_id: &str,
        top_k: usize,
        strict: bool,
    ) -> AppResult<Vec<EvidenceRecord>> {
        let Some(vector) = self.embed_query(query, strict).await? else {
            return Ok(Vec::new());
        };
        self.probe(query, corpus_id, &vector, top_k).await
    }

    /// Probe several corpora with a single query embedding. Unavailable
    /// corpora degrade to empty results with a warning; the caller only sees
    /// corpora that produced at least a probe attempt.
    pub async fn retrieve_all(
        &self,
        query: &str,
        corpus_ids: &[String],
        top_k: usize,
    ) -> AppResult<BTreeMap<String, Vec<EvidenceRecord>>> {
        let mut results = BTreeMap::new();
        if corpus_ids.is_empty() {
            return Ok(results);
        }
        let Some(vector) = self.embed_query(query, false).await? else {
            return Ok(results);
        };
        for corpus_id in corpus_ids {
            match self.probe(query, corpus_id, &vector, top_k).await {
                Ok(records) if records.is_empty() => {}
                Ok(records) => {
                    results.insert(corpus_id.clone(), records);
                }
                Err(e) => {
                    warn!(
                        target: "kestrel_evidence",
                        corpus = %corpus_id,
                        "skipping corpus: {}", e
                    );
                }
            }
        }
        Ok(results)
    }

    /// Probe one corpus with an already-computed query embedding, consulting
    /// the retrieval cache first.
    async fn probe(
        &self,
        query: &str,
        corpus_id: &str,
        vector: &[f32],
        top_k: usize,
    ) -> AppResult<Vec<EvidenceRecord>> {
        let corpus = self
            .corpora
            .get(corpus_id)
            .ok_or_else(|| AppError::EvidenceUnavailable {
                corpus: corpus_id.to_string(),
                message: "corpus is not configured".to_string(),
            })?;
        let index = corpus
            .index
            .as_ref()
            .ok_or_else(|| AppError::EvidenceUnavailable {
                corpus: corpus_id.to_string(),
                message: "corpus index is not built".to_string(),
            })?;

        let cache_key = format!("{}\u{1f}{}\u{1f}{}", corpus_id, top_k, query);
        if let Some(records) = self
            .cache
            .get_json::<Vec<EvidenceRecord>>(CacheKind::Retrieve, &cache_key)
            .await
        {
            return Ok(records);
        }

        let records: Vec<EvidenceRecord> = index
            .search(vector, top_k)
            .into_iter()
            .map(|(similarity, doc)| EvidenceRecord {
                corpus_id: corpus_id.to_string(),
                text: doc.text.clone(),
                similarity_score: similarity,
                metadata: doc.metadata.clone(),
            })
            .collect();

        if let Err(e) = self
            .cache
            .put_json(CacheKind::Retrieve, &cache_key, &records)
            .await
        {
            warn!(target: "kestrel_evidence", "failed to cache retrieval: {}", e);
        }
        Ok(records)
    }

    /// Reliability weights for fusion, keyed by corpus id.
    pub fn reliability_weights(&self) -> HashMap<String, f32> {
        self.corpora
            .iter()
            .map(|(id, c)| (id.clone(), c.config.reliability_weight))
            .collect()
    }
}
