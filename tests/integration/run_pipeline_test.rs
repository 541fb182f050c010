//! Run Pipeline Integration Tests
//!
//! Drives the engine end to end with the scripted provider: event ordering
//! and canonical results for a compound query, the low-confidence re-run
//! loop, client cancellation, degraded corpora, and routing determinism.

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::events::RunEvent;
use kestrel_core::types::{Framework, WorkerErrorKind, WorkerId, WorkerStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::support::{harness, harness_with, StubProvider};

async fn drain(mut rx: mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn geo_analyst_fanout_streams_ordered_events() {
    let h = harness(Arc::new(StubProvider::new()));
    let (tx, rx) = mpsc::channel(512);

    let record = h
        .engine
        .run(
            "Conflict escalation and hotspots in Sudan 2022-2025",
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // Canonical result order, one entry per selected worker.
    assert_eq!(
        record
            .worker_results
            .iter()
            .map(|r| r.worker_id)
            .collect::<Vec<_>>(),
        vec![WorkerId::Analyst, WorkerId::Geo]
    );
    assert_eq!(record.framework, Framework::Pmesii);

    let events = drain(rx).await;

    let started: Vec<WorkerId> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::WorkerStarted { worker } => Some(*worker),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![WorkerId::Analyst, WorkerId::Geo]);

    let completed = events
        .iter()
        .filter(|e| matches!(e, RunEvent::WorkerCompleted { .. }))
        .count();
    assert_eq!(completed, 2);

    // phase("synthesis") precedes the first delta; deltas precede the single
    // reflection; exactly one terminator ends the stream with nothing after.
    let phase_at = events
        .iter()
        .position(|e| matches!(e, RunEvent::Phase { name } if name == "synthesis"))
        .expect("missing synthesis phase");
    let first_delta = events
        .iter()
        .position(|e| matches!(e, RunEvent::SynthesisDelta { .. }))
        .expect("missing synthesis delta");
    let reflection_at = events
        .iter()
        .position(|e| matches!(e, RunEvent::Reflection { .. }))
        .expect("missing reflection");
    assert!(phase_at < first_delta);
    assert!(first_delta < reflection_at);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, RunEvent::Reflection { .. }))
            .count(),
        1
    );
    let terminators = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminators, 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn streamed_deltas_concatenate_to_persisted_synthesis() {
    let h = harness(Arc::new(StubProvider::new()));
    let (tx, rx) = mpsc::channel(512);

    let record = h
        .engine
        .run("assess instability trends", tx, CancellationToken::new())
        .await
        .unwrap();

    let concatenated: String = drain(rx)
        .await
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::SynthesisDelta { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(concatenated, record.synthesis_text);
    assert!(!record.synthesis_text.is_empty());
}

#[tokio::test]
async fn low_confidence_rerun_keeps_second_iteration() {
    let provider = Arc::new(StubProvider::new());
    provider.push_reflection(0.4, &["analyst"]);
    provider.push_reflection(0.85, &[]);
    let h = harness(provider);
    let (tx, rx) = mpsc::channel(512);

    let record = h
        .engine
        .run(
            "Conflict escalation and hotspots in Sudan",
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(record.iteration_count, 2);
    assert!((record.reflection.confidence - 0.85).abs() < 1e-6);
    // The second synthesis is the one persisted and the only one streamed.
    assert!(record.synthesis_text.starts_with("Brief 2"));
    let streamed: String = drain(rx)
        .await
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::SynthesisDelta { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, record.synthesis_text);
    assert!(!streamed.contains("Brief 1"));
}

#[tokio::test]
async fn rerun_that_lowers_confidence_retains_the_best_iteration() {
    let provider = Arc::new(StubProvider::new());
    provider.push_reflection(0.6, &["analyst"]);
    provider.push_reflection(0.3, &[]);
    let h = harness(provider);
    let (tx, rx) = mpsc::channel(512);

    let record = h
        .engine
        .run(
            "Conflict escalation and hotspots in Sudan",
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // Confidence is monotone in the retained iteration.
    assert!((record.reflection.confidence - 0.6).abs() < 1e-6);
    assert!(record.synthesis_text.starts_with("Brief 1"));
    drop(drain(rx).await);
}

#[tokio::test]
async fn dropped_client_cancels_workers_and_persists_partial_run() {
    let provider = Arc::new(StubProvider::new().with_delay(Duration::from_millis(400)));
    let h = harness(provider);
    let (tx, mut rx) = mpsc::channel(512);

    let engine = h.engine.clone();
    let run = tokio::spawn(async move {
        engine
            .run(
                "assess the latest instability in Mali",
                tx,
                CancellationToken::new(),
            )
            .await
    });

    // Simulate the client going away right after the stream opens.
    let first = rx.recv().await;
    assert!(first.is_some());
    drop(rx);

    let record = run.await.unwrap().unwrap();
    for result in &record.worker_results {
        match result.status {
            WorkerStatus::Ok | WorkerStatus::Skipped => {}
            WorkerStatus::Error => {
                assert_eq!(result.error_kind, Some(WorkerErrorKind::Cancelled));
            }
        }
    }
    // The partial run made it into memory.
    let recent = h.engine.memory().recent(1).unwrap();
    assert_eq!(recent[0].run_id, record.run_id);
}

#[tokio::test]
async fn missing_corpus_degrades_to_remaining_sources() {
    let h = harness_with(Arc::new(StubProvider::new()), &["IMF"]);
    let (tx, rx) = mpsc::channel(512);

    let record = h
        .engine
        .run(
            "Economic leverage on Ukraine, assess the impact",
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // The planner still preferred IMF, but its index is unbuilt: the fused
    // ratio must not mention it and the run still terminates with done.
    let analyst = record
        .worker_results
        .iter()
        .find(|r| r.worker_id == WorkerId::Analyst)
        .unwrap();
    if let Some(evidence) = &analyst.evidence_used {
        assert!(!evidence.ratio.contains_key("IMF"));
    }
    let events = drain(rx).await;
    assert!(matches!(events.last().unwrap(), RunEvent::Done));
}

#[tokio::test]
async fn identical_queries_route_identically_with_distinct_run_ids() {
    let h = harness(Arc::new(StubProvider::new()));

    for _ in 0..2 {
        let (tx, mut rx) = mpsc::channel(512);
        let drainer = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        h.engine
            .run(
                "Conflict escalation and hotspots in Sudan 2022-2025",
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        drainer.await.unwrap();
    }

    let records = h.engine.memory().recent(2).unwrap();
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].run_id, records[1].run_id);
    assert_eq!(records[0].selected_workers, records[1].selected_workers);
    assert_eq!(records[0].framework, records[1].framework);
    assert_eq!(records[0].task_kind, records[1].task_kind);
}
