//! Reflection Stage
//!
//! Scores the current synthesis with a dedicated generation call, flags
//! contradictions, and proposes a re-run set. Model output is JSON embedded
//! in free text; parsing extracts the outermost brace block and coerces
//! invalid fields rather than failing: a bad confidence becomes 0.5, unknown
//! worker ids are dropped, and a missing block falls back to neutral values.
//!
//! When both event and structural corpora contributed evidence, a second
//! call cross-checks them for alignment (stable institutions vs. rising
//! unrest and the like).
//!
//! Reflection never fails the run: an unreachable model degrades to a zero
//! confidence verdict with an annotated note.

use std::sync::Arc;

use kestrel_core::types::{
    ConsistencyCheck, Reflection, StabilityRating, WorkerId, WorkerResult,
};
use kestrel_llm::GenerationProvider;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::cache::{cached_generate, Cache};

/// Truncation bound for serialized results inside reflection prompts.
const PROMPT_RESULTS_BUDGET: usize = 8_000;

/// Raw reflection JSON as the model emits it, before coercion.
#[derive(Debug, Deserialize, Default)]
struct RawReflection {
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    contradictions: Vec<String>,
    #[serde(default)]
    rerun: Vec<String>,
    #[serde(default)]
    summary: String,
}

/// Raw consistency JSON before coercion.
#[derive(Debug, Deserialize, Default)]
struct RawConsistency {
    #[serde(default)]
    contradictions: Vec<String>,
    #[serde(default)]
    alignment_summary: String,
    #[serde(default)]
    overall_stability: String,
}

/// Evaluate the run's outputs.
#[allow(clippy::too_many_arguments)]
pub async fn reflect(
    provider: &Arc<dyn GenerationProvider>,
    cache: &Cache,
    model: &str,
    query: &str,
    worker_results: &[WorkerResult],
    synthesis_text: &str,
    selected: &[WorkerId],
    check_consistency: bool,
) -> Reflection {
    let results_json = serialize_results(worker_results);

    let prompt = format!(
        "You are a reflection layer analyzing outputs from multiple specialist \
         workers and the synthesized brief built from them. Evaluate factual \
         consistency, completeness, and contradictions. Suggest which workers \
         (if any) should re-run, and compute an overall confidence between 0 \
         and 1.\n\
         Respond with JSON only:\n\
         {{\"confidence\": <float>, \"contradictions\": [\"...\"], \
         \"rerun\": [\"analyst\"], \"summary\": \"...\"}}\n\n\
         Query: {}\n\nWorker outputs:\n{}\n\nSynthesized brief:\n{}",
        query,
        results_json,
        truncate(synthesis_text, PROMPT_RESULTS_BUDGET)
    );

    let response = match cached_generate(cache, provider, &prompt, model).await {
        Ok(response) => response,
        Err(e) => {
            warn!(target: "kestrel_run", "reflection model unavailable: {}", e);
            return Reflection::degraded(format!("reflection unavailable: {}", e));
        }
    };

    let mut reflection = parse_reflection(&response, selected);

    if check_consistency {
        reflection.consistency_check =
            evaluate_consistency(provider, cache, model, &results_json).await;
    }

    reflection
}

/// Cross-check structural corpora against event corpora.
async fn evaluate_consistency(
    provider: &Arc<dyn GenerationProvider>,
    cache: &Cache,
    model: &str,
    results_json: &str,
) -> ConsistencyCheck {
    let prompt = format!(
        "Evaluate the following combined analytical results for consistency \
         between structural data (factbooks, institutional indices) and event \
         data (incident feeds). Focus on contradictions such as stable \
         governance alongside increasing unrest.\n\
         Respond with JSON only:\n\
         {{\"contradictions\": [\"...\"], \"alignment_summary\": \"...\", \
         \"overall_stability\": \"Stable | Fragile | Deteriorating\"}}\n\n\
         Data:\n{}",
        results_json
    );

    match cached_generate(cache, provider, &prompt, model).await {
        Ok(response) => parse_consistency(&response),
        Err(e) => {
            warn!(target: "kestrel_run", "consistency check unavailable: {}", e);
            ConsistencyCheck {
                overall_stability: StabilityRating::Unknown,
                contradictions: Vec::new(),
                alignment_summary: format!("consistency check unavailable: {}", e),
            }
        }
    }
}

/// Parse and coerce the reflection response.
fn parse_reflection(response: &str, selected: &[WorkerId]) -> Reflection {
    let raw: RawReflection = extract_json(response)
        .and_then(|block| serde_json::from_str(block).ok())
        .unwrap_or_default();

    let confidence = match raw.confidence.as_ref().and_then(Value::as_f64) {
        Some(v) if v.is_finite() => (v as f32).clamp(0.0, 1.0),
        _ => 0.5,
    };

    // Unknown ids are dropped; valid ids are kept only when selected.
    let mut rerun: Vec<WorkerId> = raw
        .rerun
        .iter()
        .filter_map(|s| s.parse::<WorkerId>().ok())
        .filter(|id| selected.contains(id))
        .collect();
    WorkerId::sort_canonical(&mut rerun);

    Reflection {
        confidence,
        contradictions: raw.contradictions,
        rerun,
        consistency_check: ConsistencyCheck::default(),
        review_notes: raw.summary,
    }
}

/// Parse and coerce the consistency response.
fn parse_consistency(response: &str) -> ConsistencyCheck {
    let raw: RawConsistency = extract_json(response)
        .and_then(|block| serde_json::from_str(block).ok())
        .unwrap_or_default();

    let stability = raw.overall_stability.to_lowercase();
    let overall_stability = if stability.contains("deteriorat") {
        StabilityRating::Deteriorating
    } else if stability.contains("fragile") {
        StabilityRating::Fragile
    } else if stability.contains("stable") {
        StabilityRating::Stable
    } else {
        StabilityRating::Unknown
    };

    ConsistencyCheck {
        overall_stability,
        contradictions: raw.contradictions,
        alignment_summary: raw.alignment_summary,
    }
}

/// The outermost `{...}` block of a response, if any.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Serialize worker results compactly, bounded for prompt inclusion.
fn serialize_results(worker_results: &[WorkerResult]) -> String {
    let value: Vec<Value> = worker_results
        .iter()
        .map(|r| {
            serde_json::json!({
                "worker": r.worker_id,
                "status": r.status,
                "output": truncate(&r.output_text, 1_500),
            })
        })
        .collect();
    let serialized = serde_json::to_string_pretty(&value).unwrap_or_default();
    truncate(&serialized, PROMPT_RESULTS_BUDGET).to_string()
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
