//! Redactor Worker
//!
//! Condenses the combined output of the other workers into an executive
//! brief. The executor dispatches it as a trailing wave, composing the
//! sibling outputs into the query text so the contract surface stays
//! uniform; when it is the only selected worker it condenses the raw query.

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::types::{WorkerId, WorkerResult};
use kestrel_llm::GenerationProvider;

use crate::cache::Cache;

use super::{generate_with_cancel, Worker, WorkerClock, WorkerContext};

pub struct RedactorWorker {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    model: String,
}

impl RedactorWorker {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: Arc<Cache>, model: String) -> Self {
        Self {
            provider,
            cache,
            model,
        }
    }
}

#[async_trait]
impl Worker for RedactorWorker {
    fn id(&self) -> WorkerId {
        WorkerId::Redactor
    }

    fn requires_evidence(&self) -> bool {
        false
    }

    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let clock = WorkerClock::start();
        ctx.progress.emit("condensing findings").await;

        let prompt = format!(
            "You are an intelligence editor. Rewrite the material below as an \
             executive brief: a two-sentence bottom line up front, then at most \
             five bullet points of supporting detail. Preserve every caveat; \
             cut everything else.\n\nMaterial:\n{}",
            ctx.query
        );

        match generate_with_cancel(
            WorkerId::Redactor,
            &ctx,
            &self.cache,
            &self.provider,
            &prompt,
            &self.model,
            &clock,
        )
        .await
        {
            Ok(output) => WorkerResult::ok(WorkerId::Redactor, output, clock.elapsed_ms()),
            Err(result) => result,
        }
    }
}
