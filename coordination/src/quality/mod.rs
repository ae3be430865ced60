//! Answer quality gate
//!
//! Deterministic parts of answer validation:
//!
//! - [`heuristics`]: fast checks that need no model call
//! - [`verdict`]: parsing of the validator's accuracy verdict
//! - [`gate`]: which validation path a state takes and how its outcome is
//!   folded back into the state
//! - [`decision`]: the accept / reject decision and its fallback reason

pub mod decision;
pub mod gate;
pub mod heuristics;
pub mod verdict;

use serde::{Deserialize, Serialize};

pub use decision::{is_ambiguous_query, should_reject, GateDecision};
pub use gate::{plan_validation, ValidationPlan, ValidationScope};
pub use heuristics::{run_heuristics, HeuristicIssue, HeuristicReport};
pub use verdict::{parse_verdict, ValidationVerdict};

/// How heuristic findings affect the outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicMode {
    /// Findings are recorded as quality notes only
    #[default]
    Advisory,
    /// Hedging phrases and ungrounded numbers set the hallucination flag
    Gating,
}

impl std::fmt::Display for HeuristicMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Advisory => write!(f, "advisory"),
            Self::Gating => write!(f, "gating"),
        }
    }
}

impl std::str::FromStr for HeuristicMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "gating" => Ok(Self::Gating),
            other => Err(format!("unknown heuristic mode: {other}")),
        }
    }
}

/// Thresholds used by the gate and the hybrid dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Hybrid partial successes below this confidence are rejected
    pub hybrid_min_confidence: f64,
    /// Non-hybrid answers below this confidence are rejected
    pub reject_below: f64,
    /// Top relevance below this means the evidence missed the question
    pub low_relevance_threshold: f64,
    /// Minimum confidence for a validly priced pricing answer
    pub pricing_confidence_floor: f64,
    /// Multiplier applied when any used data source is low-trust
    pub low_trust_penalty: f64,
    /// Queries of at most this many words count as vague
    pub short_query_words: usize,
    pub heuristic_mode: HeuristicMode,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            hybrid_min_confidence: 0.2,
            reject_below: 0.25,
            low_relevance_threshold: 0.4,
            pricing_confidence_floor: 0.85,
            low_trust_penalty: 0.85,
            short_query_words: 4,
            heuristic_mode: HeuristicMode::Advisory,
        }
    }
}
