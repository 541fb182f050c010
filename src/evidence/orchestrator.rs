//! Context Orchestrator
//!
//! Maps a query to the evidence corpora worth consulting and the analytical
//! framework to scaffold the synthesis with. A deterministic bag-of-keywords
//! classifier buckets the query into a small closed set of themes; each theme
//! carries a fixed preferred-corpora list and framework. Unclassified queries
//! select every available corpus with no framework.

use kestrel_core::types::Framework;
use tracing::debug;

/// Query theme detected by the keyword classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    ConflictSecurity,
    EconomyFinance,
    GovernanceDemocracy,
    DevelopmentSocial,
    Generic,
}

/// Outcome of source planning: which corpora to probe, in preference order,
/// and which framework to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    pub theme: Theme,
    pub corpora: Vec<String>,
    pub framework: Framework,
}

/// Keyword tables per theme. Checked in declaration order; first hit wins.
const ECONOMY_KEYWORDS: &[&str] = &[
    "economy", "economic", "growth", "gdp", "inflation", "finance", "debt", "trade",
];
const CONFLICT_KEYWORDS: &[&str] = &[
    "conflict", "violence", "war", "security", "protest", "instability", "escalation",
    "hotspot",
];
const GOVERNANCE_KEYWORDS: &[&str] = &[
    "governance", "democracy", "liberty", "rights", "regime", "institution", "election",
];
const DEVELOPMENT_KEYWORDS: &[&str] = &[
    "development", "education", "poverty", "social", "health",
];

/// Preferred corpora per theme, in preference order.
const ECONOMY_CORPORA: &[&str] = &["IMF", "WBI", "CIA_FACTS"];
const CONFLICT_CORPORA: &[&str] = &["ACLED", "CIA_FACTS", "FREEDOM_WORLD"];
const GOVERNANCE_CORPORA: &[&str] = &["FREEDOM_WORLD", "CIA_FACTS", "IMF"];
const DEVELOPMENT_CORPORA: &[&str] = &["WBI", "CIA_FACTS", "FREEDOM_WORLD"];

/// Classify a query into a theme.
pub fn classify_theme(query: &str) -> Theme {
    let q = query.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| q.contains(k));

    if matches(ECONOMY_KEYWORDS) {
        Theme::EconomyFinance
    } else if matches(CONFLICT_KEYWORDS) {
        Theme::ConflictSecurity
    } else if matches(GOVERNANCE_KEYWORDS) {
        Theme::GovernanceDemocracy
    } else if matches(DEVELOPMENT_KEYWORDS) {
        Theme::DevelopmentSocial
    } else {
        Theme::Generic
    }
}

/// Plan evidence sources and framework for a query.
///
/// The theme's preferred corpora are intersected with `available` (preserving
/// preference order); a missing preferred corpus is simply dropped here and
/// surfaces later as an empty retrieval. Generic queries select everything.
pub fn select(query: &str, available: &[String]) -> SourcePlan {
    let theme = classify_theme(query);

    let (preferred, framework): (Vec<String>, Framework) = match theme {
        Theme::EconomyFinance => (to_owned(ECONOMY_CORPORA), Framework::Dime),
        Theme::ConflictSecurity => (to_owned(CONFLICT_CORPORA), Framework::Pmesii),
        Theme::GovernanceDemocracy => (to_owned(GOVERNANCE_CORPORA), Framework::Pmesii),
        Theme::DevelopmentSocial => (to_owned(DEVELOPMENT_CORPORA), Framework::Swot),
        Theme::Generic => (available.to_vec(), Framework::None),
    };

    let corpora: Vec<String> = match theme {
        Theme::Generic => preferred,
        _ => preferred
            .into_iter()
            .filter(|c| available.iter().any(|a| a == c))
            .collect(),
    };

    debug!(
        target: "kestrel_evidence",
        ?theme,
        %framework,
        corpora = ?corpora,
        "planned evidence sources"
    );

    SourcePlan {
        theme,
        corpora,
        framework,
    }
}

fn to_owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
