//! Geospatial Worker
//!
//! Evidence-bound hotspot analysis over event corpora. Aggregates country /
//! event-type counts from record metadata before asking the model for a
//! spatial reading, so the summary always rests on actual tallies. Map
//! rendering itself is an external collaborator; when a map artifact exists
//! its path is referenced, never generated here.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::types::{FusedEvidence, WorkerId, WorkerResult};
use kestrel_llm::GenerationProvider;
use serde_json::json;

use crate::cache::Cache;

use super::{generate_with_cancel, render_evidence, Worker, WorkerClock, WorkerContext};

const PROMPT_EVIDENCE_BUDGET: usize = 4_000;

pub struct GeoWorker {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    model: String,
}

impl GeoWorker {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: Arc<Cache>, model: String) -> Self {
        Self {
            provider,
            cache,
            model,
        }
    }
}

/// Tally `country` and `event_type` metadata across the evidence.
fn aggregate_hotspots(evidence: &FusedEvidence) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in &evidence.records {
        let country = record
            .metadata
            .get("country")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let event_type = record
            .metadata
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("event");
        *counts
            .entry(format!("{}/{}", country, event_type))
            .or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl Worker for GeoWorker {
    fn id(&self) -> WorkerId {
        WorkerId::Geo
    }

    fn requires_evidence(&self) -> bool {
        true
    }

    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let clock = WorkerClock::start();

        let Some(evidence) = ctx.evidence.clone().filter(|e| !e.is_empty()) else {
            return WorkerResult::skipped(WorkerId::Geo, "no event evidence retrieved");
        };

        let hotspots = aggregate_hotspots(&evidence);
        ctx.progress
            .emit(format!(
                "clustered {} records into {} location/event buckets",
                evidence.records.len(),
                hotspots.len()
            ))
            .await;

        let tally_lines: String = hotspots
            .iter()
            .map(|(bucket, count)| format!("- {}: {} record(s)\n", bucket, count))
            .collect();

        let prompt = format!(
            "You are a geospatial analyst. Using the event tallies and the \
             underlying evidence, describe the geographic pattern relevant to \
             the question: where activity concentrates, whether it is spreading, \
             and which locations warrant monitoring.\n\n\
             Question: {}\n\nEvent tallies:\n{}\nEvidence:\n{}",
            ctx.query,
            tally_lines,
            render_evidence(&evidence, PROMPT_EVIDENCE_BUDGET)
        );

        let output = match generate_with_cancel(
            WorkerId::Geo,
            &ctx,
            &self.cache,
            &self.provider,
            &prompt,
            &self.model,
            &clock,
        )
        .await
        {
            Ok(text) => text,
            Err(result) => return result,
        };

        let mut result = WorkerResult::ok(WorkerId::Geo, output, clock.elapsed_ms());
        result
            .structured_output
            .insert("hotspots".to_string(), json!(hotspots));
        result.evidence_used = Some((*evidence).clone());
        result
    }
}
