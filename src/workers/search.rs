//! Search Worker
//!
//! Recency-oriented briefing. Actual web scraping is an external collaborator
//! behind the generation interface; this worker owns the recency framing and
//! the web-retrieval cache (1 hour freshness, unlike evidence retrievals
//! which never expire).

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::types::{WorkerErrorKind, WorkerId, WorkerResult};
use kestrel_llm::{GenerationProvider, LlmError};
use tracing::warn;

use crate::cache::{Cache, CacheKind};

use super::{Worker, WorkerClock, WorkerContext};

pub struct SearchWorker {
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    model: String,
}

impl SearchWorker {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: Arc<Cache>, model: String) -> Self {
        Self {
            provider,
            cache,
            model,
        }
    }
}

#[async_trait]
impl Worker for SearchWorker {
    fn id(&self) -> WorkerId {
        WorkerId::Search
    }

    fn requires_evidence(&self) -> bool {
        false
    }

    async fn run(&self, ctx: WorkerContext) -> WorkerResult {
        let clock = WorkerClock::start();

        let cache_key = format!("{}\u{1f}{}", self.model, ctx.query);
        if let Some(cached) = self
            .cache
            .get_json::<String>(CacheKind::Websearch, &cache_key)
            .await
        {
            ctx.progress.emit("serving recent results from cache").await;
            return WorkerResult::ok(WorkerId::Search, cached, clock.elapsed_ms());
        }

        ctx.progress.emit("searching recent reporting").await;

        let prompt = format!(
            "You are an open-source research assistant focused on current \
             reporting. List the most relevant recent developments for the \
             query below as short sourced bullet points, newest first. Flag \
             anything you cannot date.\n\nQuery: {}",
            ctx.query
        );

        let generated = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return WorkerResult::error(
                    WorkerId::Search,
                    WorkerErrorKind::Cancelled,
                    "cancelled before search completed",
                    clock.elapsed_ms(),
                );
            }
            generated = self.provider.generate(&prompt, &self.model) => generated,
        };

        match generated {
            Ok(output) => {
                if let Err(e) = self
                    .cache
                    .put_json(CacheKind::Websearch, &cache_key, &output)
                    .await
                {
                    warn!(target: "kestrel_workers", "failed to cache search result: {}", e);
                }
                WorkerResult::ok(WorkerId::Search, output, clock.elapsed_ms())
            }
            Err(e) => {
                let kind = match e {
                    LlmError::ProviderUnavailable { .. } => WorkerErrorKind::GenerationUnavailable,
                    LlmError::Timeout { .. } => WorkerErrorKind::Timeout,
                    _ => WorkerErrorKind::Failed,
                };
                WorkerResult::error(WorkerId::Search, kind, e.to_string(), clock.elapsed_ms())
            }
        }
    }
}
