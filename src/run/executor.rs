//! Parallel Worker Executor
//!
//! Fans the selected workers out into concurrent units bounded by a
//! semaphore, forwards their progress onto the run's event channel, and
//! collects one result per worker. The executor never fails fast: a failing
//! worker yields an error result and its siblings continue.
//!
//! Ordering guarantees: dispatch (and with it `worker_started` emission)
//! follows the canonical worker order because permits are acquired in the
//! dispatch loop, not inside the spawned units; the returned results are
//! re-sorted into canonical order regardless of completion order.
//!
//! Deadlines: each unit enforces its worker's own deadline; the caller's
//! overall deadline is enforced at collection time. On expiry the
//! cancellation token is fired and units get a grace window to return a
//! partial result before being aborted and marked as timed out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_core::events::RunEvent;
use kestrel_core::types::{FusedEvidence, WorkerErrorKind, WorkerId, WorkerResult};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::workers::{ProgressSender, Worker, WorkerContext};

/// Hard cap on concurrently executing workers.
pub const MAX_PARALLEL_CAP: usize = 3;

/// Execution limits for one executor call.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Concurrency bound; effective value is `min(max_parallel, |workers|)`,
    /// itself capped at [`MAX_PARALLEL_CAP`].
    pub max_parallel: usize,
    /// Budget for the whole call, spanning every wave.
    pub overall_deadline: Duration,
    /// Window after cancellation before units are hard-terminated.
    pub grace: Duration,
    /// Per-worker deadlines.
    pub worker_timeouts: HashMap<WorkerId, Duration>,
}

impl ExecutorOptions {
    fn worker_timeout(&self, id: WorkerId) -> Duration {
        self.worker_timeouts
            .get(&id)
            .copied()
            .unwrap_or(Duration::from_secs(60))
    }

    fn effective_parallelism(&self, workers: usize) -> usize {
        self.max_parallel.min(workers).min(MAX_PARALLEL_CAP).max(1)
    }
}

/// Run `workers` (already in canonical order) concurrently against `query`.
///
/// Every worker produces exactly one `WorkerResult`; the returned list is in
/// canonical order. `event_tx` receives `worker_started`, `worker_progress`,
/// and `worker_completed` events as they happen; send failures are tolerated
/// (a disconnected client must not stop execution).
pub async fn execute(
    workers: &[Arc<dyn Worker>],
    query: &str,
    evidence: Option<Arc<FusedEvidence>>,
    event_tx: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
    opts: &ExecutorOptions,
) -> Vec<WorkerResult> {
    if workers.is_empty() {
        return Vec::new();
    }

    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(opts.effective_parallelism(workers.len())));
    let mut handles: Vec<(WorkerId, JoinHandle<WorkerResult>)> = Vec::new();

    for worker in workers {
        let id = worker.id();

        // Acquiring in the dispatch loop serializes wave admission, which is
        // what keeps `worker_started` in canonical order.
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let _ = event_tx.send(RunEvent::WorkerStarted { worker: id }).await;

        let ctx = WorkerContext {
            query: query.to_string(),
            evidence: if worker.requires_evidence() {
                evidence.clone()
            } else {
                None
            },
            progress: ProgressSender::new(id, event_tx.clone()),
            cancel: cancel.clone(),
        };

        let worker = worker.clone();
        let unit_tx = event_tx.clone();
        let deadline = opts.worker_timeout(id);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let result = match timeout(deadline, worker.run(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(target: "kestrel_executor", worker = %id, "worker deadline exceeded");
                    WorkerResult::error(
                        id,
                        WorkerErrorKind::Timeout,
                        format!("exceeded {}ms deadline", deadline.as_millis()),
                        deadline.as_millis() as u64,
                    )
                }
            };
            let _ = unit_tx
                .send(RunEvent::WorkerCompleted {
                    worker: id,
                    summary: result.summary(),
                })
                .await;
            result
        });
        handles.push((id, handle));
    }

    // Collect within the overall deadline; on expiry, cancel and grant one
    // shared grace window before hard-terminating what is left.
    let mut results: Vec<WorkerResult> = Vec::with_capacity(handles.len());
    let mut grace_until: Option<Instant> = None;

    for (id, mut handle) in handles {
        let remaining = match grace_until {
            Some(_) => Duration::ZERO,
            None => opts.overall_deadline.saturating_sub(started.elapsed()),
        };

        let joined = match timeout(remaining, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                let grace_deadline = *grace_until.get_or_insert_with(|| {
                    cancel.cancel();
                    debug!(
                        target: "kestrel_executor",
                        "overall deadline expired, granting {}ms grace",
                        opts.grace.as_millis()
                    );
                    Instant::now() + opts.grace
                });
                let grace_left = grace_deadline.saturating_duration_since(Instant::now());
                match timeout(grace_left, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        // Did not return within the grace window: hard stop.
                        handle.abort();
                        let result = WorkerResult::error(
                            id,
                            WorkerErrorKind::Timeout,
                            "overall run deadline exceeded",
                            started.elapsed().as_millis() as u64,
                        );
                        let _ = event_tx
                            .send(RunEvent::WorkerCompleted {
                                worker: id,
                                summary: result.summary(),
                            })
                            .await;
                        results.push(result);
                        continue;
                    }
                }
            }
        };

        match joined {
            Ok(result) => results.push(result),
            Err(join_err) => {
                warn!(target: "kestrel_executor", worker = %id, "worker unit died: {}", join_err);
                let kind = if join_err.is_cancelled() {
                    WorkerErrorKind::Timeout
                } else {
                    WorkerErrorKind::Failed
                };
                let result = WorkerResult::error(
                    id,
                    kind,
                    join_err.to_string(),
                    started.elapsed().as_millis() as u64,
                );
                let _ = event_tx
                    .send(RunEvent::WorkerCompleted {
                        worker: id,
                        summary: result.summary(),
                    })
                    .await;
                results.push(result);
            }
        }
    }

    results.sort_by_key(|r| r.worker_id.canonical_rank());
    results
}
