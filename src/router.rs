//! Router / Intent Classifier
//!
//! Maps a query to the set of workers to invoke and the task kind. The rule
//! set is deterministic: cues compose by set union, the worker set is sorted
//! into canonical order, and a query with no cues defaults to the analyst.

use std::sync::OnceLock;

use kestrel_core::types::{TaskKind, WorkerId};
use regex::Regex;
use tracing::debug;

/// Countries and regions that trigger the geospatial worker. Lowercase.
const GEO_LEXICON: &[&str] = &[
    "afghanistan", "africa", "algeria", "asia", "balkans", "bangladesh", "belarus",
    "bolivia", "brazil", "burkina faso", "cameroon", "caucasus", "chad", "chile", "china",
    "colombia", "congo", "cuba", "egypt", "ethiopia", "europe", "georgia", "ghana", "haiti",
    "india", "indonesia", "iran", "iraq", "israel", "jordan", "kazakhstan", "kenya",
    "lebanon", "libya", "mali", "mexico", "middle east", "morocco", "mozambique", "myanmar",
    "niger", "nigeria", "pakistan", "palestine", "peru", "philippines", "russia", "rwanda",
    "sahel", "saudi arabia", "senegal", "somalia", "south africa", "south sudan", "sudan",
    "syria", "taiwan", "tanzania", "thailand", "tunisia", "turkey", "uganda", "ukraine",
    "venezuela", "vietnam", "yemen", "zimbabwe",
];

/// Analytical verbs and nouns that trigger the analyst worker.
const ANALYST_CUES: &[&str] = &[
    "analyze", "analyse", "assess", "assessment", "trend", "impact", "evaluate",
    "pattern", "compare", "forecast", "escalation",
];

/// Recency cues that trigger the search worker.
const SEARCH_CUES: &[&str] = &[
    "today", "latest", "news", "current", "recent", "breaking", "this week",
];

/// Computation cues that trigger the code worker.
const CODE_CUES: &[&str] = &[
    "compute", "calculate", "plot", "chart", "graph", "table of",
];

/// Summarization cues that trigger the redactor worker.
const REDACTOR_CUES: &[&str] = &[
    "brief", "executive summary", "summarize", "summarise", "summary", "tldr",
];

/// Routing decision for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub task_kind: TaskKind,
    /// Selected workers in canonical order.
    pub workers: Vec<WorkerId>,
}

/// Route a query to its worker set and task kind.
pub fn route(query: &str) -> RouteDecision {
    let q = query.to_lowercase();
    let mut workers: Vec<WorkerId> = Vec::new();

    if GEO_LEXICON.iter().any(|term| contains_term(&q, term)) {
        workers.push(WorkerId::Geo);
    }
    if ANALYST_CUES.iter().any(|cue| contains_term(&q, cue)) {
        workers.push(WorkerId::Analyst);
    }
    if SEARCH_CUES.iter().any(|cue| contains_term(&q, cue)) {
        workers.push(WorkerId::Search);
    }
    if CODE_CUES.iter().any(|cue| contains_term(&q, cue)) {
        workers.push(WorkerId::Code);
    }
    if REDACTOR_CUES.iter().any(|cue| contains_term(&q, cue)) {
        workers.push(WorkerId::Redactor);
    }

    if workers.is_empty() {
        workers.push(WorkerId::Analyst);
    }
    WorkerId::sort_canonical(&mut workers);

    let task_kind = if workers.len() > 1 {
        TaskKind::Compound
    } else {
        match workers[0] {
            WorkerId::Search => TaskKind::Search,
            WorkerId::Geo => TaskKind::Geospatial,
            WorkerId::Code => TaskKind::Code,
            WorkerId::Redactor => TaskKind::Summarize,
            _ => TaskKind::Analyze,
        }
    };

    debug!(
        target: "kestrel_router",
        %task_kind,
        workers = ?workers.iter().map(WorkerId::as_str).collect::<Vec<_>>(),
        "routed query"
    );

    RouteDecision { task_kind, workers }
}

/// Whole-word containment: "war" must not match "warranty". Multi-word terms
/// fall back to plain substring search.
fn contains_term(haystack: &str, term: &str) -> bool {
    if term.contains(' ') {
        return haystack.contains(term);
    }
    static WORD_SPLIT: OnceLock<Regex> = OnceLock::new();
    let splitter = WORD_SPLIT.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap());
    splitter.split(haystack).any(|word| word == term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_and_analyst_compose_in_canonical_order() {
        let decision = route("Conflict escalation and hotspots in Sudan 2022-2025");
        assert_eq!(decision.workers, vec![WorkerId::Analyst, WorkerId::Geo]);
        assert_eq!(decision.task_kind, TaskKind::Compound);
    }

    #[test]
    fn recency_cues_select_search() {
        let decision = route("latest developments");
        assert_eq!(decision.workers, vec![WorkerId::Search]);
        assert_eq!(decision.task_kind, TaskKind::Search);
    }

    #[test]
    fn computation_cues_select_code() {
        let decision = route("plot the fatalities per month");
        assert_eq!(decision.workers, vec![WorkerId::Code]);
        assert_eq!(decision.task_kind, TaskKind::Code);
    }

    #[test]
    fn summary_cues_select_redactor() {
        let decision = route("executive summary of the situation");
        assert_eq!(decision.workers, vec![WorkerId::Redactor]);
        assert_eq!(decision.task_kind, TaskKind::Summarize);
    }

    #[test]
    fn default_is_analyst() {
        let decision = route("hello");
        assert_eq!(decision.workers, vec![WorkerId::Analyst]);
        assert_eq!(decision.task_kind, TaskKind::Analyze);
    }

    #[test]
    fn word_boundaries_are_respected() {
        // "warranty" must not trip the "war"-adjacent analyst/geo cues,
        // and "chile" must match as a word, not inside "chilean".
        let decision = route("is this warranty valid");
        assert_eq!(decision.workers, vec![WorkerId::Analyst]);
        assert!(contains_term("report on chile", "chile"));
        assert!(!contains_term("chilean report", "chile"));
    }

    #[test]
    fn routing_is_deterministic() {
        let a = route("assess the latest instability in Mali, brief me");
        let b = route("assess the latest instability in Mali, brief me");
        assert_eq!(a, b);
        assert_eq!(
            a.workers,
            vec![
                WorkerId::Search,
                WorkerId::Analyst,
                WorkerId::Geo,
                WorkerId::Redactor
            ]
        );
    }
}
