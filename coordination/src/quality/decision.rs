//! Accept / reject decision for a validated state.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::GateConfig;
use crate::state::{FallbackReason, Intent, RequestState};

/// Answers that honestly report missing information are valid answers.
const NO_INFORMATION_PHRASES: &[&str] = &["don't have that information", "couldn't find"];

/// Terms that make even a very short query specific enough.
const SPECIFIC_TERMS: &[&str] = &[
    "impedance",
    "bypass",
    "voltage",
    "power",
    "presets",
    "effects",
    "amp model",
];

static VAGUE_QUERY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^(how do i|how to)\s+(put|get|make|do|use)\s+(it|this|that)\s*(on|off|up|down)?$",
        r"(?i)^(what|where|how)\s+(is|are|do|does)\s+(it|this|that)(\?)?$",
        r"(?i)^(the|a|an)\s+\w+$",
        r"(?i)^(put|get|turn|set)\s+(it|this)\s*(on|off)?$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("VAGUE_QUERY regex should compile"))
    .collect()
});

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum GateDecision {
    Accept,
    Reject(FallbackReason),
}

impl GateDecision {
    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }

    /// The fallback reason to record; `none` when accepted.
    pub fn reason(&self) -> FallbackReason {
        match self {
            Self::Accept => FallbackReason::None,
            Self::Reject(reason) => *reason,
        }
    }
}

impl std::fmt::Display for GateDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject(reason) => write!(f, "reject ({reason})"),
        }
    }
}

/// Whether a query is too vague to answer without clarification.
pub fn is_ambiguous_query(query: &str, config: &GateConfig) -> bool {
    let query = query.trim().to_lowercase();
    if VAGUE_QUERY_RES.iter().any(|re| re.is_match(&query)) {
        return true;
    }
    query.split_whitespace().count() <= config.short_query_words
        && !SPECIFIC_TERMS.iter().any(|t| query.contains(t))
}

/// Decide whether the candidate answer is rejected, and why.
///
/// Pure function of the state; the caller records the reason.
pub fn should_reject(state: &RequestState, config: &GateConfig) -> GateDecision {
    if state.intent == Some(Intent::Hybrid) && state.hybrid_partial_success {
        if state.confidence_score < config.hybrid_min_confidence {
            return GateDecision::Reject(FallbackReason::LowRelevance);
        }
        if state.error.as_ref().is_some_and(|e| e.critical) {
            return GateDecision::Reject(FallbackReason::RetrievalFailed);
        }
        return GateDecision::Accept;
    }

    let Some(answer) = state.raw_answer.as_deref().filter(|a| !a.trim().is_empty()) else {
        return GateDecision::Reject(missing_source_reason(state));
    };

    if state.protected_answer {
        return GateDecision::Accept;
    }

    let answer_lower = answer.to_lowercase();
    if NO_INFORMATION_PHRASES
        .iter()
        .any(|p| answer_lower.contains(p))
    {
        return GateDecision::Accept;
    }

    let ambiguous = is_ambiguous_query(&state.normalized_query, config);

    if state.hallucination_flag {
        // Without any evidence there was nothing to ground against.
        if !state.has_evidence() {
            return GateDecision::Reject(missing_source_reason(state));
        }
        return GateDecision::Reject(FallbackReason::HallucinationDetected);
    }

    if state.confidence_score < config.reject_below {
        let reason = if ambiguous {
            FallbackReason::AmbiguousQuery
        } else if !state.has_evidence() {
            missing_source_reason(state)
        } else if state
            .top_relevance()
            .is_some_and(|top| top < config.low_relevance_threshold)
        {
            FallbackReason::LowRelevance
        } else {
            FallbackReason::ConceptNotExplicit
        };
        return GateDecision::Reject(reason);
    }

    if let Some(error) = &state.error {
        return GateDecision::Reject(error.fallback_reason());
    }

    GateDecision::Accept
}

fn missing_source_reason(state: &RequestState) -> FallbackReason {
    if state.subject_undocumented {
        FallbackReason::DataMissing
    } else {
        FallbackReason::RetrievalFailed
    }
}
