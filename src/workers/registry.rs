//! Worker Registry
//!
//! Static registry mapping worker ids to their implementations, built once
//! from configuration. New worker kinds compose by adding an entry here and
//! a cue in the router.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_core::types::{WorkerId, CANONICAL_WORKER_ORDER};
use kestrel_llm::GenerationProvider;

use crate::cache::Cache;
use crate::config::KestrelConfig;
use crate::error::{AppError, AppResult};

use super::analyst::AnalystWorker;
use super::code::CodeWorker;
use super::geo::GeoWorker;
use super::redactor::RedactorWorker;
use super::search::SearchWorker;
use super::Worker;

/// All configured workers, keyed by id.
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    /// Build every routable worker from configuration.
    pub fn from_config(
        config: &KestrelConfig,
        provider: Arc<dyn GenerationProvider>,
        cache: Arc<Cache>,
    ) -> Self {
        let mut workers: HashMap<WorkerId, Arc<dyn Worker>> = HashMap::new();
        for id in CANONICAL_WORKER_ORDER {
            let model = config.worker_model(id).to_string();
            let worker: Arc<dyn Worker> = match id {
                WorkerId::Search => {
                    Arc::new(SearchWorker::new(provider.clone(), cache.clone(), model))
                }
                WorkerId::Analyst => {
                    Arc::new(AnalystWorker::new(provider.clone(), cache.clone(), model))
                }
                WorkerId::Geo => Arc::new(GeoWorker::new(provider.clone(), cache.clone(), model)),
                WorkerId::Code => Arc::new(CodeWorker::new(provider.clone(), cache.clone(), model)),
                WorkerId::Redactor => {
                    Arc::new(RedactorWorker::new(provider.clone(), cache.clone(), model))
                }
                WorkerId::Reflection => continue,
            };
            workers.insert(id, worker);
        }
        Self { workers }
    }

    /// Build a registry from pre-constructed workers (tests, stubs).
    pub fn from_workers(list: Vec<Arc<dyn Worker>>) -> Self {
        Self {
            workers: list.into_iter().map(|w| (w.id(), w)).collect(),
        }
    }

    pub fn get(&self, id: WorkerId) -> AppResult<Arc<dyn Worker>> {
        self.workers
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("worker '{}' is not registered", id)))
    }

    /// Resolve a selected set into implementations, preserving order.
    pub fn resolve(&self, ids: &[WorkerId]) -> AppResult<Vec<Arc<dyn Worker>>> {
        ids.iter().map(|&id| self.get(id)).collect()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        WorkerId::sort_canonical(&mut ids);
        ids
    }
}
