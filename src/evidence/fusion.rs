//! Context Fusion
//!
//! Merges per-corpus retrievals into a single ranked evidence list. Each
//! record's weighted score is its similarity multiplied by the reliability
//! weight of its source corpus; duplicates across corpora are collapsed onto
//! the highest-weighted copy. The output ordering is fully deterministic:
//! weighted score descending, then corpus id ascending, then insertion order.

use std::collections::{BTreeMap, HashMap};

use kestrel_core::types::{EvidenceRecord, Framework, FusedEvidence, FusedRecord};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Characters of normalized text that participate in the dedup fingerprint.
const FINGERPRINT_PREFIX_LEN: usize = 256;

/// Weight applied to corpora absent from the weight table.
const DEFAULT_RELIABILITY_WEIGHT: f32 = 0.5;

/// Fuse per-corpus retrievals into ranked, deduplicated evidence.
///
/// `retrievals` is keyed by corpus id (BTreeMap so iteration order, and with
/// it insertion order for tie-breaks, is deterministic). Empty input yields
/// an empty `FusedEvidence` carrying the framework.
pub fn fuse(
    retrievals: &BTreeMap<String, Vec<EvidenceRecord>>,
    weights: &HashMap<String, f32>,
    framework: Framework,
) -> FusedEvidence {
    // Collect all records with their insertion index, weighting as we go.
    let mut candidates: Vec<(usize, FusedRecord)> = Vec::new();
    for records in retrievals.values() {
        for record in records {
            let weight = weights
                .get(&record.corpus_id)
                .copied()
                .unwrap_or(DEFAULT_RELIABILITY_WEIGHT);
            candidates.push((candidates.len(), FusedRecord::new(record.clone(), weight)));
        }
    }

    // Dedup on content fingerprint, keeping the highest-weighted copy.
    let mut best: HashMap<String, (usize, FusedRecord)> = HashMap::new();
    for (index, record) in candidates {
        let key = content_fingerprint(&record.text);
        match best.get(&key) {
            Some((_, kept)) if kept.weighted_score() >= record.weighted_score() => {}
            _ => {
                best.insert(key, (index, record));
            }
        }
    }

    let mut survivors: Vec<(usize, FusedRecord)> = best.into_values().collect();
    survivors.sort_by(|(ia, a), (ib, b)| {
        b.weighted_score()
            .total_cmp(&a.weighted_score())
            .then_with(|| a.corpus_id.cmp(&b.corpus_id))
            .then_with(|| ia.cmp(ib))
    });

    let mut ratio: BTreeMap<String, usize> = BTreeMap::new();
    let records: Vec<FusedRecord> = survivors.into_iter().map(|(_, r)| r).collect();
    for record in &records {
        *ratio.entry(record.corpus_id.clone()).or_insert(0) += 1;
    }

    debug!(
        target: "kestrel_evidence",
        fused = records.len(),
        corpora = ratio.len(),
        %framework,
        "fused retrievals"
    );

    FusedEvidence {
        records,
        ratio,
        framework,
    }
}

/// Content fingerprint used for deduplication: lowercase, collapse
/// whitespace runs, hash the first [`FINGERPRINT_PREFIX_LEN`] characters.
fn content_fingerprint(text: &str) -> String {
    let normalized: String = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let prefix: String = normalized.chars().take(FINGERPRINT_PREFIX_LEN).collect();
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(corpus: &str, text: &str, score: f32) -> EvidenceRecord {
        EvidenceRecord {
            corpus_id: corpus.to_string(),
            text: text.to_string(),
            similarity_score: score,
            metadata: HashMap::new(),
        }
    }

    fn weights() -> HashMap<String, f32> {
        [
            ("ACLED".to_string(), 0.5),
            ("IMF".to_string(), 0.75),
            ("WBI".to_string(), 0.7),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn ranks_by_weighted_score_descending() {
        let mut retrievals = BTreeMap::new();
        retrievals.insert(
            "ACLED".to_string(),
            vec![record("ACLED", "protests in khartoum", 0.9)],
        );
        retrievals.insert(
            "IMF".to_string(),
            vec![record("IMF", "gdp contracted twelve percent", 0.8)],
        );

        let fused = fuse(&retrievals, &weights(), Framework::Pmesii);
        // IMF: 0.8 * 0.75 = 0.6 beats ACLED: 0.9 * 0.5 = 0.45
        assert_eq!(fused.records[0].corpus_id, "IMF");
        assert_eq!(fused.records[1].corpus_id, "ACLED");
        for pair in fused.records.windows(2) {
            assert!(pair[0].weighted_score() >= pair[1].weighted_score());
        }
    }

    #[test]
    fn ties_break_on_corpus_id() {
        let mut retrievals = BTreeMap::new();
        // Equal weighted scores: 0.7 * 0.5 (ACLED default absent corpus) vs crafted
        retrievals.insert("WBI".to_string(), vec![record("WBI", "poverty metrics", 0.5)]);
        retrievals.insert("ACLED".to_string(), vec![record("ACLED", "border clash", 0.7)]);

        let fused = fuse(&retrievals, &weights(), Framework::None);
        // Both weighted scores are 0.35; ACLED < WBI lexicographically.
        assert_eq!(fused.records[0].corpus_id, "ACLED");
        assert_eq!(fused.records[1].corpus_id, "WBI");
    }

    #[test]
    fn dedup_keeps_highest_weighted_copy() {
        let mut retrievals = BTreeMap::new();
        retrievals.insert(
            "ACLED".to_string(),
            vec![record("ACLED", "Sudan   GDP contracted", 0.9)],
        );
        retrievals.insert(
            "IMF".to_string(),
            vec![record("IMF", "sudan gdp CONTRACTED", 0.9)],
        );

        let fused = fuse(&retrievals, &weights(), Framework::Dime);
        assert_eq!(fused.records.len(), 1);
        assert_eq!(fused.records[0].corpus_id, "IMF");
        assert_eq!(fused.ratio.get("IMF"), Some(&1));
        assert!(!fused.ratio.contains_key("ACLED"));
    }

    #[test]
    fn ratio_sums_to_record_count() {
        let mut retrievals = BTreeMap::new();
        retrievals.insert(
            "ACLED".to_string(),
            vec![
                record("ACLED", "event one", 0.8),
                record("ACLED", "event two", 0.6),
            ],
        );
        retrievals.insert("IMF".to_string(), vec![record("IMF", "debt figures", 0.7)]);

        let fused = fuse(&retrievals, &weights(), Framework::None);
        let total: usize = fused.ratio.values().sum();
        assert_eq!(total, fused.records.len());
    }

    #[test]
    fn empty_input_yields_empty_fusion() {
        let fused = fuse(&BTreeMap::new(), &weights(), Framework::Swot);
        assert!(fused.records.is_empty());
        assert!(fused.ratio.is_empty());
        assert_eq!(fused.framework, Framework::Swot);
    }

    #[test]
    fn fusion_is_deterministic() {
        let mut retrievals = BTreeMap::new();
        retrievals.insert(
            "ACLED".to_string(),
            vec![record("ACLED", "a", 0.5), record("ACLED", "b", 0.5)],
        );
        retrievals.insert("WBI".to_string(), vec![record("WBI", "c", 0.5)]);

        let first = fuse(&retrievals, &weights(), Framework::None);
        let second = fuse(&retrievals, &weights(), Framework::None);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
