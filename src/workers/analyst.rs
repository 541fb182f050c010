//! Analyst Worker
//!
//! Evidence-bound reasoning over the fused corpus material, structured by
//! the analytical framework chosen for the run. Skips when retrieval came
//! back empty: an analysis with nothing to ground it would be fabrication.

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::types::{Framework, WorkerId, WorkerResult};
use kestrel_llm::GenerationProvider;
use serde_json::json;

use crate::cache::Cache;

use super::{generate_with_cancel, render_evidence, Worker, WorkerClock, WorkerContext};

/// Character budget for evidence inside the analyst prompt.
const PROMPT_EVIDENCE_BUDGET: usize = 6_000;

pub struct AnalystWorker {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    model: String,
}

impl AnalystWorker {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: Arc<Cache>, model: String) -> Self {
        Self {
            provider,
            cache,
            model,
        }
    }

    fn build_prompt(&self, ctx: &WorkerContext, framework: Framework) -> String {
        let evidence = ctx
            .evidence
            .as_deref()
            .map(|e| render_evidence(e, PROMPT_EVIDENCE_BUDGET))
            .unwrap_or_default();

        let framework_instruction = match framework {
            Framework::Pmesii => {
                "Structure your findings under the PMESII domains: Political, \
                 Military, Economic, Social, Information, Infrastructure. \
                 Close with an overall stability assessment."
            }
            Framework::Dime => {
                "Structure your findings under the DIME vectors: Diplomatic, \
                 Information, Military, Economic."
            }
            Framework::Swot => {
                "Structure your findings as a SWOT analysis: Strengths, \
                 Weaknesses, Opportunities, Threats."
            }
            Framework::None => "Present your findings as concise analytical prose.",
        };

        format!(
            "You are an intelligence analyst. Ground every claim in the numbered \
             evidence below; cite record numbers inline.\n\n\
             Question: {}\n\n{}\n\nEvidence:\n{}",
            ctx.query, framework_instruction, evidence
        )
    }
}

#[async_trait]
impl Worker for AnalystWorker {
    fn id(&self) -> WorkerId {
        WorkerId::Analyst
    }

    fn requires_evidence(&self) -> bool {
        true
    }

    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let clock = WorkerClock::start();

        let Some(evidence) = ctx.evidence.clone().filter(|e| !e.is_empty()) else {
            return WorkerResult::skipped(WorkerId::Analyst, "no evidence retrieved");
        };

        let framework = evidence.framework;
        ctx.progress
            .emit(format!(
                "analyzing {} evidence records ({} framework)",
                evidence.records.len(),
                framework
            ))
            .await;

        let prompt = self.build_prompt(&ctx, framework);
        let output = match generate_with_cancel(
            WorkerId::Analyst,
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

        let mut result = WorkerResult::ok(WorkerId::Analyst, output, clock.elapsed_ms());
        result
            .structured_output
            .insert("framework".to_string(), json!(framework));
        result
            .structured_output
            .insert("evidence_ratio".to_string(), json!(evidence.ratio));
        result.evidence_used = Some((*evidence).clone());
        result
    }
}
