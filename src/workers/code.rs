//! Code Worker
//!
//! Turns computation cues ("compute", "plot", "table of") into a worked
//! computation plan with a runnable snippet. Sandboxed execution is an
//! external collaborator; the run consumes the plan text and any artifact
//! path the sandbox later reports.

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::types::{WorkerId, WorkerResult};
use kestrel_llm::GenerationProvider;

use crate::cache::Cache;

use super::{generate_with_cancel, Worker, WorkerClock, WorkerContext};

pub struct CodeWorker {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    model: String,
}

impl CodeWorker {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: Arc<Cache>, model: String) -> Self {
        Self {
            provider,
            cache,
            model,
        }
    }
}

#[async_trait]
impl Worker for CodeWorker {
    fn id(&self) -> WorkerId {
        WorkerId::Code
    }

    fn requires_evidence(&self) -> bool {
        false
    }

    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let clock = WorkerClock::start();
        ctx.progress.emit("drafting computation plan").await;

        let prompt = format!(
            "You are a data analysis assistant. For the request below, write \
             (1) a short plan of the computation, and (2) a self-contained \
             Python snippet that performs it, reading only local files under \
             data/. State your assumptions about input columns explicitly.\n\n\
             Request: {}",
            ctx.query
        );

        match generate_with_cancel(
            WorkerId::Code,
            &ctx,
            &self.cache,
            &self.provider,
            &prompt,
            &self.model,
            &clock,
        )
        .await
        {
            Ok(output) => WorkerResult::ok(WorkerId::Code, output, clock.elapsed_ms()),
            Err(result) => result,
        }
    }
}
