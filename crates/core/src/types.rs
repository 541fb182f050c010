//! Run Data Model
//!
//! Types shared by the router, executor, fusion, reflection loop, transport,
//! and collaboration memory: worker identities, task classification, evidence
//! records, worker results, reflection verdicts, and the persisted run record.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Worker identity
// ============================================================================

/// Stable symbolic identifier of a specialist worker.
///
/// Each worker has a configured generation model; `Reflection` is owned by
/// the reflection stage and is never selected by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerId {
    Search,
    Analyst,
    Geo,
    Code,
    Redactor,
    Reflection,
}

/// Canonical ordering of routable workers. Dispatch order, result order, and
/// `worker_started` emission order all follow this table.
pub const CANONICAL_WORKER_ORDER: [WorkerId; 5] = [
    WorkerId::Search,
    WorkerId::Analyst,
    WorkerId::Geo,
    WorkerId::Code,
    WorkerId::Redactor,
];

impl WorkerId {
    /// Stable string form used in config files, logs, and the wire protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerId::Search => "search",
            WorkerId::Analyst => "analyst",
            WorkerId::Geo => "geo",
            WorkerId::Code => "code",
            WorkerId::Redactor => "redactor",
            WorkerId::Reflection => "reflection",
        }
    }

    /// Position in the canonical order; `Reflection` sorts last.
    pub fn canonical_rank(&self) -> usize {
        CANONICAL_WORKER_ORDER
            .iter()
            .position(|w| w == self)
            .unwrap_or(CANONICAL_WORKER_ORDER.len())
    }

    /// Sort a worker set into canonical order, dropping duplicates.
    pub fn sort_canonical(workers: &mut Vec<WorkerId>) {
        workers.sort_by_key(WorkerId::canonical_rank);
        workers.dedup();
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "search" => Ok(WorkerId::Search),
            "analyst" => Ok(WorkerId::Analyst),
            "geo" => Ok(WorkerId::Geo),
            "code" => Ok(WorkerId::Code),
            "redactor" => Ok(WorkerId::Redactor),
            "reflection" => Ok(WorkerId::Reflection),
            other => Err(format!("unknown worker id: {}", other)),
        }
    }
}

// ============================================================================
// Task classification
// ============================================================================

/// Kind of task the router classified a query into.
/// `Compound` means more than one worker was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Search,
    Analyze,
    Geospatial,
    Code,
    Summarize,
    Compound,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Search => "search",
            TaskKind::Analyze => "analyze",
            TaskKind::Geospatial => "geospatial",
            TaskKind::Code => "code",
            TaskKind::Summarize => "summarize",
            TaskKind::Compound => "compound",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Analytical framework
// ============================================================================

/// Structural scaffold applied to the synthesis prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Framework {
    #[serde(rename = "PMESII")]
    Pmesii,
    #[serde(rename = "DIME")]
    Dime,
    #[serde(rename = "SWOT")]
    Swot,
    #[serde(rename = "none")]
    #[default]
    None,
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Framework::Pmesii => "PMESII",
            Framework::Dime => "DIME",
            Framework::Swot => "SWOT",
            Framework::None => "none",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Evidence
// ============================================================================

/// A single retrieval hit from one corpus.
///
/// `similarity_score` is in `[0, 1]`; the reliability-weighted score is
/// computed at fusion time and never stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub corpus_id: String,
    pub text: String,
    pub similarity_score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// An evidence record that survived fusion, carrying the reliability weight
/// of its source corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedRecord {
    pub corpus_id: String,
    pub text: String,
    pub similarity_score: f32,
    pub reliability_weight: f32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl FusedRecord {
    pub fn new(record: EvidenceRecord, reliability_weight: f32) -> Self {
        Self {
            corpus_id: record.corpus_id,
            text: record.text,
            similarity_score: record.similarity_score,
            reliability_weight,
            metadata: record.metadata,
        }
    }

    /// Reliability-weighted relevance score.
    pub fn weighted_score(&self) -> f32 {
        self.similarity_score * self.reliability_weight
    }
}

/// Ranked, deduplicated evidence across all consulted corpora.
///
/// Records are sorted by weighted score descending; ties break on corpus id
/// ascending, then insertion order. `ratio` counts surviving records per
/// corpus and always sums to `records.len()`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FusedEvidence {
    pub records: Vec<FusedRecord>,
    pub ratio: BTreeMap<String, usize>,
    #[serde(default)]
    pub framework: Framework,
}

impl FusedEvidence {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Worker results
// ============================================================================

/// Terminal status of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ok,
    Error,
    Skipped,
}

/// Why a worker ended with `WorkerStatus::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorKind {
    Timeout,
    Cancelled,
    GenerationUnavailable,
    Failed,
}

impl fmt::Display for WorkerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerErrorKind::Timeout => "timeout",
            WorkerErrorKind::Cancelled => "cancelled",
            WorkerErrorKind::GenerationUnavailable => "generation_unavailable",
            WorkerErrorKind::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub output_text: String,
    /// Open mapping of worker-specific structured output.
    #[serde(default)]
    pub structured_output: HashMap<String, Value>,
    /// External references produced by the worker (map paths, report paths).
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<WorkerErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_used: Option<FusedEvidence>,
}

impl WorkerResult {
    /// Create a successful result.
    pub fn ok(worker_id: WorkerId, output_text: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            worker_id,
            status: WorkerStatus::Ok,
            output_text: output_text.into(),
            structured_output: HashMap::new(),
            artifacts: Vec::new(),
            duration_ms,
            error_kind: None,
            evidence_used: None,
        }
    }

    /// Create an error result with the given kind.
    pub fn error(
        worker_id: WorkerId,
        kind: WorkerErrorKind,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            worker_id,
            status: WorkerStatus::Error,
            output_text: message.into(),
            structured_output: HashMap::new(),
            artifacts: Vec::new(),
            duration_ms,
            error_kind: Some(kind),
            evidence_used: None,
        }
    }

    /// Create a skipped result. Valid only when a hard precondition failed,
    /// e.g. empty evidence for a strictly evidence-bound worker.
    pub fn skipped(worker_id: WorkerId, reason: impl Into<String>) -> Self {
        Self {
            worker_id,
            status: WorkerStatus::Skipped,
            output_text: reason.into(),
            structured_output: HashMap::new(),
            artifacts: Vec::new(),
            duration_ms: 0,
            error_kind: None,
            evidence_used: None,
        }
    }

    /// One-line summary for `worker_completed` events.
    pub fn summary(&self) -> String {
        match self.status {
            WorkerStatus::Ok => {
                let first_line = self.output_text.lines().next().unwrap_or("done");
                if first_line.chars().count() > 120 {
                    let truncated: String = first_line.chars().take(117).collect();
                    format!("{}...", truncated)
                } else {
                    first_line.to_string()
                }
            }
            WorkerStatus::Error => match self.error_kind {
                Some(kind) => format!("failed ({})", kind),
                None => "failed".to_string(),
            },
            WorkerStatus::Skipped => format!("skipped: {}", self.output_text),
        }
    }
}

// ============================================================================
// Reflection
// ============================================================================

/// Stability verdict from the structural-vs-event consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StabilityRating {
    Stable,
    Fragile,
    Deteriorating,
    #[default]
    Unknown,
}

impl fmt::Display for StabilityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StabilityRating::Stable => "Stable",
            StabilityRating::Fragile => "Fragile",
            StabilityRating::Deteriorating => "Deteriorating",
            StabilityRating::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Cross-check of structural corpora (factbooks, indices) against event
/// corpora (incident feeds) where both contributed evidence.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConsistencyCheck {
    #[serde(default)]
    pub overall_stability: StabilityRating,
    #[serde(default)]
    pub contradictions: Vec<String>,
    #[serde(default)]
    pub alignment_summary: String,
}

/// Meta-evaluation of a synthesis: confidence, contradictions, and the set of
/// workers whose output warrants a re-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub confidence: f32,
    #[serde(default)]
    pub contradictions: Vec<String>,
    #[serde(default)]
    pub rerun: Vec<WorkerId>,
    #[serde(default)]
    pub consistency_check: ConsistencyCheck,
    #[serde(default)]
    pub review_notes: String,
}

impl Reflection {
    /// Fallback used when the reflection model is unavailable: zero
    /// confidence, no re-runs, annotated notes. The run still completes.
    pub fn degraded(notes: impl Into<String>) -> Self {
        Self {
            confidence: 0.0,
            contradictions: Vec::new(),
            rerun: Vec::new(),
            consistency_check: ConsistencyCheck::default(),
            review_notes: notes.into(),
        }
    }

    /// Human-readable one-paragraph summary for the event stream.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Confidence: {:.2} | Stability: {}",
            self.confidence, self.consistency_check.overall_stability
        );
        if !self.contradictions.is_empty() {
            out.push_str(&format!(
                " | {} contradiction(s) noted",
                self.contradictions.len()
            ));
        }
        if !self.rerun.is_empty() {
            let ids: Vec<&str> = self.rerun.iter().map(WorkerId::as_str).collect();
            out.push_str(&format!(" | re-run requested: {}", ids.join(", ")));
        }
        out
    }
}

// ============================================================================
// Run record
// ============================================================================

/// Persisted, append-only record of one end-to-end run. Revisions are new
/// records pointing at their predecessor via `parent_run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub query: String,
    pub task_kind: TaskKind,
    pub selected_workers: Vec<WorkerId>,
    pub framework: Framework,
    pub worker_results: Vec<WorkerResult>,
    pub synthesis_text: String,
    pub reflection: Reflection,
    pub iteration_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
