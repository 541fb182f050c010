//! Dense Vector Index
//!
//! Per-corpus index of embedded documents, loaded from
//! `data/vector_index/<corpus_id>/index.json` (format: a JSON array of
//! `{id, text, embedding, metadata}` objects, produced by the external
//! ingesters). Search is an exact cosine scan; corpora are small enough that
//! brute force stays fast and, unlike approximate structures, the result is
//! deterministic for identical index state.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, AppResult};

/// One embedded document inside a corpus index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedDoc {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// An in-memory corpus index. Read-only after load.
#[derive(Debug, Default)]
pub struct CorpusIndex {
    docs: Vec<IndexedDoc>,
    dimension: usize,
}

impl CorpusIndex {
    /// Load a corpus index from its directory.
    ///
    /// Documents with a malformed embedding (empty, wrong dimension, or
    /// non-finite values) are dropped with a warning rather than failing the
    /// whole corpus.
    pub fn load(dir: &Path, corpus_id: &str) -> AppResult<Self> {
        let path = dir.join("index.json");
        if !path.exists() {
            return Err(AppError::EvidenceUnavailable {
                corpus: corpus_id.to_string(),
                message: format!("index file {} not found", path.display()),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        let raw: Vec<IndexedDoc> =
            serde_json::from_str(&content).map_err(|e| AppError::EvidenceUnavailable {
                corpus: corpus_id.to_string(),
                message: format!("unreadable index: {}", e),
            })?;

        let mut dimension = 0usize;
        let mut docs = Vec::with_capacity(raw.len());
        for doc in raw {
            if doc.embedding.is_empty() || doc.embedding.iter().any(|v| !v.is_finite()) {
                warn!(
                    target: "kestrel_evidence",
                    corpus = corpus_id,
                    doc = %doc.id,
                    "dropping document with malformed embedding"
                );
                continue;
            }
            if dimension == 0 {
                dimension = doc.embedding.len();
            } else if doc.embedding.len() != dimension {
                warn!(
                    target: "kestrel_evidence",
                    corpus = corpus_id,
                    doc = %doc.id,
                    "dropping document with mismatched embedding dimension"
                );
                continue;
            }
            docs.push(doc);
        }

        Ok(Self { docs, dimension })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Top-k documents by cosine similarity to `query`, best first.
    /// Similarity is clamped into [0, 1]; ties keep index order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(f32, &IndexedDoc)> {
        if self.docs.is_empty() || query.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(f32, &IndexedDoc)> = self
            .docs
            .iter()
            .map(|doc| {
                let similarity = cosine_similarity(query, &doc.embedding).clamp(0.0, 1.0);
                (similarity, doc)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(top_k);
        scored
    }

    #[cfg(test)]
    pub fn from_docs(docs: Vec<IndexedDoc>) -> Self {
        let dimension = docs.first().map(|d| d.embedding.len()).unwrap_or(0);
        Self { docs, dimension }
    }
}

/// Cosine similarity between two vectors; 0.0 when either norm vanishes or
/// the dimensions disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, embedding: Vec<f32>) -> IndexedDoc {
        IndexedDoc {
            id: id.to_string(),
            text: format!("text for {}", id),
            embedding,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_handles_dimension_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let index = CorpusIndex::from_docs(vec![
            doc("far", vec![0.0, 1.0]),
            doc("near", vec![1.0, 0.05]),
            doc("exact", vec![1.0, 0.0]),
        ]);
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].1.id, "exact");
        assert_eq!(hits[1].1.id, "near");
    }

    #[test]
    fn search_on_empty_index_returns_nothing() {
        let index = CorpusIndex::default();
        assert!(index.search(&[1.0], 5).is_empty());
    }

    #[test]
    fn load_missing_corpus_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = CorpusIndex::load(dir.path(), "ACLED").unwrap_err();
        assert!(matches!(err, AppError::EvidenceUnavailable { .. }));
    }
}
