//! Run Engine
//!
//! Owns the lifecycle of one query: classify, retrieve, execute, synthesize,
//! reflect, optionally re-execute a shrinking worker subset, and persist.
//! Every stage reports onto a single event channel; the transport drains that
//! channel, so clients observe stage order exactly as produced.
//!
//! Synthesis iterations are generated in streaming mode but buffered until
//! the reflection loop settles on the iteration to keep; only the retained
//! iteration's deltas reach the wire, which keeps the stream's delta
//! concatenation byte-identical to the persisted synthesis.

pub mod executor;
pub mod reflection;
pub mod synthesis;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kestrel_core::events::RunEvent;
use kestrel_core::types::{
    Reflection, RunRecord, WorkerId, WorkerResult,
};
use kestrel_llm::GenerationProvider;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::KestrelConfig;
use crate::error::{AppError, AppResult};
use crate::evidence::{fusion, orchestrator, EvidenceStore};
use crate::memory::CollaborationMemory;
use crate::router;
use crate::workers::WorkerRegistry;

use executor::ExecutorOptions;
use synthesis::SynthesisOutput;

/// One completed synthesize/reflect cycle.
struct Iteration {
    results: Vec<WorkerResult>,
    synthesis: SynthesisOutput,
    reflection: Reflection,
}

/// The orchestration core: everything needed to take a query end to end.
pub struct RunEngine {
    config: Arc<KestrelConfig>,
    provider: Arc<dyn GenerationProvider>,
    cache: Arc<Cache>,
    store: Arc<EvidenceStore>,
    registry: Arc<WorkerRegistry>,
    memory: Arc<CollaborationMemory>,
}

impl RunEngine {
    pub fn new(
        config: Arc<KestrelConfig>,
        provider: Arc<dyn GenerationProvider>,
        cache: Arc<Cache>,
        store: Arc<EvidenceStore>,
        registry: Arc<WorkerRegistry>,
        memory: Arc<CollaborationMemory>,
    ) -> Self {
        Self {
            config,
            provider,
            cache,
            store,
            registry,
            memory,
        }
    }

    pub fn config(&self) -> &KestrelConfig {
        &self.config
    }

    pub fn store(&self) -> &EvidenceStore {
        &self.store
    }

    pub fn memory(&self) -> &CollaborationMemory {
        &self.memory
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Execute one run. Events (progress, deltas, reflection, terminator) are
    /// pushed onto `event_tx`; the persisted record is also returned for
    /// non-streaming callers. Exactly one terminal event is emitted.
    pub async fn run(
        &self,
        query: &str,
        event_tx: mpsc::Sender<RunEvent>,
        cancel: CancellationToken,
    ) -> AppResult<RunRecord> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_deadline = Duration::from_millis(self.config.thresholds.run_deadline_ms);
        let run_id = Uuid::new_v4().to_string();

        // A dropped receiver means the client went away: cancel the run so
        // in-flight workers wind down inside the grace window.
        let watchdog = {
            let tx = event_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tx.closed().await;
                cancel.cancel();
            })
        };

        let outcome = self
            .run_inner(
                &run_id,
                query,
                started_at,
                started,
                run_deadline,
                &event_tx,
                &cancel,
            )
            .await;

        watchdog.abort();

        match outcome {
            Ok(record) => {
                let _ = event_tx.send(RunEvent::Done).await;
                Ok(record)
            }
            Err(e) => {
                warn!(target: "kestrel_run", run_id = %run_id, "run failed: {}", e);
                let _ = event_tx
                    .send(RunEvent::error(e.kind(), e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_inner(
        &self,
        run_id: &str,
        query: &str,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        run_deadline: Duration,
        event_tx: &mpsc::Sender<RunEvent>,
        cancel: &CancellationToken,
    ) -> AppResult<RunRecord> {
        let thresholds = &self.config.thresholds;

        // -- classify ------------------------------------------------------
        let decision = router::route(query);
        let complexity = query_complexity(query);
        info!(
            target: "kestrel_run",
            run_id,
            task_kind = %decision.task_kind,
            workers = ?decision.workers.iter().map(WorkerId::as_str).collect::<Vec<_>>(),
            complexity = complexity.level,
            "classified query"
        );

        // -- retrieve ------------------------------------------------------
        let configured: Vec<String> = self.config.corpora.iter().map(|c| c.id.clone()).collect();
        let plan = orchestrator::select(query, &configured);
        let needs_evidence = decision.workers.iter().any(|&id| {
            self.config
                .worker(id)
                .map(|w| w.requires_evidence)
                .unwrap_or(false)
        });

        let evidence = if needs_evidence {
            let retrievals = self
                .store
                .retrieve_all(query, &plan.corpora, thresholds.retrieval_top_k)
                .await?;
            let fused = fusion::fuse(&retrievals, &self.store.reliability_weights(), plan.framework);
            debug!(
                target: "kestrel_run",
                run_id,
                records = fused.records.len(),
                "retrieved and fused evidence"
            );
            Some(Arc::new(fused))
        } else {
            None
        };

        // -- execute (iteration 1) -----------------------------------------
        let remaining = |started: Instant| run_deadline.saturating_sub(started.elapsed());
        let results = self
            .execute_selected(
                &decision.workers,
                query,
                evidence.clone(),
                event_tx.clone(),
                cancel.clone(),
                remaining(started),
            )
            .await?;

        if cancel.is_cancelled() {
            return self
                .persist(
                    run_id, query, started_at, &decision, &plan,
                    Iteration {
                        results,
                        synthesis: SynthesisOutput::default(),
                        reflection: Reflection::degraded("run cancelled before synthesis"),
                    },
                    1,
                )
                .await;
        }

        // -- synthesize + reflect loop -------------------------------------
        let check_consistency = evidence
            .as_deref()
            .map(|e| self.has_structural_and_event_sources(e))
            .unwrap_or(false);

        let mut current = self
            .synthesize_and_reflect(
                query,
                evidence.as_deref(),
                results,
                &decision.workers,
                check_consistency,
                cancel,
            )
            .await?;
        let mut iteration_count = 1u32;
        let mut previous_rerun_len = decision.workers.len();
        let mut best_confidence = current.reflection.confidence;

        while current.reflection.confidence < thresholds.confidence_floor
            && iteration_count < thresholds.max_iterations
            && !cancel.is_cancelled()
        {
            let rerun = current.reflection.rerun.clone();
            // The re-run set must shrink strictly at each step, or we stop.
            if rerun.is_empty() || rerun.len() >= previous_rerun_len {
                break;
            }

            info!(
                target: "kestrel_run",
                run_id,
                rerun = ?rerun.iter().map(WorkerId::as_str).collect::<Vec<_>>(),
                confidence = current.reflection.confidence,
                "re-running low-confidence workers"
            );

            let rerun_results = self
                .execute_selected(
                    &rerun,
                    query,
                    evidence.clone(),
                    event_tx.clone(),
                    cancel.clone(),
                    remaining(started),
                )
                .await?;

            // Replace re-run entries, keep everything else, restore order.
            let mut merged = current.results.clone();
            for result in rerun_results {
                match merged.iter_mut().find(|r| r.worker_id == result.worker_id) {
                    Some(slot) => *slot = result,
                    None => merged.push(result),
                }
            }
            merged.sort_by_key(|r| r.worker_id.canonical_rank());

            let next = self
                .synthesize_and_reflect(
                    query,
                    evidence.as_deref(),
                    merged,
                    &decision.workers,
                    check_consistency,
                    cancel,
                )
                .await?;

            iteration_count += 1;
            previous_rerun_len = rerun.len();

            // Retain the best iteration; a re-run that lowered confidence
            // ends the loop with the earlier result kept.
            if next.reflection.confidence > best_confidence {
                best_confidence = next.reflection.confidence;
                current = next;
            } else {
                break;
            }
        }

        // -- emit the retained iteration -----------------------------------
        // Only the kept iteration's deltas reach the wire; their
        // concatenation equals the persisted synthesis text.
        let _ = event_tx.send(RunEvent::phase("synthesis")).await;
        for delta in &current.synthesis.deltas {
            let _ = event_tx
                .send(RunEvent::SynthesisDelta {
                    text: delta.clone(),
                })
                .await;
        }
        let _ = event_tx
            .send(RunEvent::Reflection {
                reflection: current.reflection.clone(),
            })
            .await;

        self.persist(run_id, query, started_at, &decision, &plan, current, iteration_count)
            .await
    }

    /// Execute a worker set: the evidence-consuming wave first, then the
    /// redactor as a trailing wave fed with its siblings' combined output
    /// (query text stays the carrier so the worker contract is uniform).
    async fn execute_selected(
        &self,
        selected: &[WorkerId],
        query: &str,
        evidence: Option<Arc<kestrel_core::types::FusedEvidence>>,
        event_tx: mpsc::Sender<RunEvent>,
        cancel: CancellationToken,
        remaining: Duration,
    ) -> AppResult<Vec<WorkerResult>> {
        let wave_started = Instant::now();
        let opts = ExecutorOptions {
            max_parallel: self.config.thresholds.max_parallel,
            overall_deadline: remaining,
            grace: Duration::from_millis(self.config.thresholds.grace_ms),
            worker_timeouts: self.worker_timeouts(),
        };

        let main_ids: Vec<WorkerId> = selected
            .iter()
            .copied()
            .filter(|&id| id != WorkerId::Redactor)
            .collect();

        let mut results = if main_ids.is_empty() {
            Vec::new()
        } else {
            let workers = self.registry.resolve(&main_ids)?;
            executor::execute(
                &workers,
                query,
                evidence.clone(),
                event_tx.clone(),
                cancel.clone(),
                &opts,
            )
            .await
        };

        if selected.contains(&WorkerId::Redactor) {
            let redactor = self.registry.get(WorkerId::Redactor)?;
            let input = compose_redactor_input(query, &results);
            let mut redactor_results = executor::execute(
                &[redactor],
                &input,
                None,
                event_tx,
                cancel,
                &ExecutorOptions {
                    overall_deadline: remaining.saturating_sub(wave_started.elapsed()),
                    ..opts
                },
            )
            .await;
            results.append(&mut redactor_results);
        }

        results.sort_by_key(|r| r.worker_id.canonical_rank());
        Ok(results)
    }

    /// One buffered synthesize + reflect cycle.
    async fn synthesize_and_reflect(
        &self,
        query: &str,
        evidence: Option<&kestrel_core::types::FusedEvidence>,
        results: Vec<WorkerResult>,
        selected: &[WorkerId],
        check_consistency: bool,
        cancel: &CancellationToken,
    ) -> AppResult<Iteration> {
        let framework = evidence.map(|e| e.framework).unwrap_or_default();
        let prompt = synthesis::build_prompt(
            query,
            evidence,
            &results,
            framework,
            self.config.thresholds.evidence_char_budget,
        );
        let output = synthesis::synthesize(
            &self.provider,
            &self.cache,
            &self.config.generation.default_model,
            &prompt,
            cancel,
        )
        .await?;

        if output.cancelled {
            return Ok(Iteration {
                results,
                synthesis: output,
                reflection: Reflection::degraded("run cancelled during synthesis"),
            });
        }

        let reflection = reflection::reflect(
            &self.provider,
            &self.cache,
            self.config.worker_model(WorkerId::Reflection),
            query,
            &results,
            &output.text,
            selected,
            check_consistency,
        )
        .await;

        Ok(Iteration {
            results,
            synthesis: output,
            reflection,
        })
    }

    /// Stream the retained iteration, persist the run record everywhere it
    /// goes (memory log, per-run report, latest-reasoning snapshot), and
    /// hand the record back.
    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        run_id: &str,
        query: &str,
        started_at: chrono::DateTime<Utc>,
        decision: &router::RouteDecision,
        plan: &orchestrator::SourcePlan,
        iteration: Iteration,
        iteration_count: u32,
    ) -> AppResult<RunRecord> {
        let record = RunRecord {
            run_id: run_id.to_string(),
            parent_run_id: None,
            query: query.to_string(),
            task_kind: decision.task_kind,
            selected_workers: decision.workers.clone(),
            framework: plan.framework,
            worker_results: iteration.results,
            synthesis_text: iteration.synthesis.text.clone(),
            reflection: iteration.reflection,
            iteration_count,
            started_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = self.memory.append(&record).await {
            warn!(target: "kestrel_run", run_id, "failed to append to memory log: {}", e);
        }
        self.write_reports(&record);

        Ok(record)
    }

    /// Write `report_<run_id>.json` and refresh `last_reasoning.json`.
    fn write_reports(&self, record: &RunRecord) {
        let dir = self.config.analysis_dir();
        let write = |path: std::path::PathBuf| {
            let serialized = match serde_json::to_string_pretty(record) {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "kestrel_run", "failed to serialize run record: {}", e);
                    return;
                }
            };
            if let Err(e) =
                std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, serialized))
            {
                warn!(target: "kestrel_run", path = %path.display(), "failed to write report: {}", e);
            }
        };
        write(dir.join(format!("report_{}.json", record.run_id)));
        write(dir.join("last_reasoning.json"));
    }

    fn worker_timeouts(&self) -> HashMap<WorkerId, Duration> {
        self.config
            .workers
            .iter()
            .map(|w| (w.id, Duration::from_millis(w.timeout_ms)))
            .collect()
    }

    /// Whether the fused evidence spans both event and structural corpora.
    fn has_structural_and_event_sources(
        &self,
        evidence: &kestrel_core::types::FusedEvidence,
    ) -> bool {
        let has_tag = |tag: &str| {
            evidence.ratio.keys().any(|corpus| {
                self.store
                    .corpus_tags(corpus)
                    .map(|tags| tags.iter().any(|t| t == tag))
                    .unwrap_or(false)
            })
        };
        has_tag("events") && has_tag("structural")
    }
}

/// Compose the redactor's input from the query and sibling outputs.
fn compose_redactor_input(query: &str, results: &[WorkerResult]) -> String {
    let mut combined = format!("Query: {}\n", query);
    for result in results {
        combined.push_str(&format!(
            "\n{} RESULTS:\n{}\n",
            result.worker_id.as_str().to_uppercase(),
            result.output_text
        ));
    }
    combined
}

/// Coarse complexity heuristic, logged at classification time.
struct QueryComplexity {
    level: &'static str,
}

fn query_complexity(query: &str) -> QueryComplexity {
    let word_count = query.split_whitespace().count();
    let multiple_questions = query.matches('?').count() > 1;
    let analytical = ["analyze", "compare", "evaluate"]
        .iter()
        .any(|v| query.to_lowercase().contains(v));

    let mut score = 0u32;
    if word_count > 20 {
        score += 2;
    }
    if multiple_questions {
        score += 2;
    }
    if analytical {
        score += 1;
    }
    QueryComplexity {
        level: match score {
            0 => "low",
            1..=2 => "medium",
            _ => "high",
        },
    }
}
