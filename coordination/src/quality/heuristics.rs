//! Fast heuristic checks run before the model verdict.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::state::RequestState;

/// Phrases that suggest the answer drew on general knowledge, not the source.
const HEDGING_PHRASES: &[&str] = &[
    "according to my knowledge",
    "as far as i know",
    "generally speaking",
    "typically",
    "usually",
];

/// Answers longer than this multiple of the evidence are suspicious.
const ELABORATION_RATIO: f64 = 1.5;

/// Below this share of addressed sub-questions the answer is incomplete.
const MIN_COVERAGE: f64 = 0.5;

/// "Don't know" answers should come with at least this confidence.
const DONT_KNOW_MIN_CONFIDENCE: f64 = 0.8;

static NUMBER_WITH_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d+(?:\.\d+)?\s*(?:kΩ|MΩ|Hz|kHz|dB|V|mA)?\b")
        .expect("NUMBER_WITH_UNIT_RE regex should compile")
});

/// A single heuristic finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeuristicIssue {
    /// Fewer than half of the sub-questions appear in the answer
    IncompleteCoverage { addressed: usize, total: usize },
    /// Answer is much longer than all evidence combined
    Elaboration,
    /// A number (with optional unit) does not appear in the evidence
    UngroundedNumber { number: String },
    HedgingPhrase { phrase: String },
    /// A "don't have that information" answer with low confidence
    UnsureNoInfo,
}

impl HeuristicIssue {
    /// Whether this finding sets the hallucination flag in gating mode.
    pub fn is_grounding_issue(&self) -> bool {
        matches!(
            self,
            Self::UngroundedNumber { .. } | Self::HedgingPhrase { .. }
        )
    }
}

impl std::fmt::Display for HeuristicIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompleteCoverage { addressed, total } => write!(
                f,
                "only {addressed}/{total} sub-questions appear to be addressed"
            ),
            Self::Elaboration => write!(f, "answer is significantly longer than its sources"),
            Self::UngroundedNumber { number } => write!(f, "number '{number}' not found in sources"),
            Self::HedgingPhrase { phrase } => write!(f, "hedging phrase detected: '{phrase}'"),
            Self::UnsureNoInfo => write!(f, "low confidence on a 'don't know' answer"),
        }
    }
}

/// Outcome of the heuristic pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicReport {
    pub issues: Vec<HeuristicIssue>,
}

impl HeuristicReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_grounding_issue(&self) -> bool {
        self.issues.iter().any(HeuristicIssue::is_grounding_issue)
    }

    /// Render findings as quality notes.
    pub fn notes(&self) -> Vec<String> {
        self.issues
            .iter()
            .map(|issue| format!("Heuristic: {issue}"))
            .collect()
    }
}

/// Run every heuristic against `answer` and the state's evidence.
///
/// `answer` is passed separately so hybrid requests can check only the
/// manual sub-answer.
pub fn run_heuristics(state: &RequestState, answer: &str) -> HeuristicReport {
    let mut issues = Vec::new();
    let answer_lower = answer.to_lowercase();
    let sources = state.evidence_texts();

    if state.sub_questions.len() > 1 {
        let total = state.sub_questions.len();
        let addressed = state
            .sub_questions
            .iter()
            .filter(|q| sub_question_addressed(q, &answer_lower))
            .count();
        if (addressed as f64 / total as f64) < MIN_COVERAGE {
            issues.push(HeuristicIssue::IncompleteCoverage { addressed, total });
        }
    }

    if !sources.is_empty() {
        let source_len: usize = sources.iter().map(|s| s.chars().count()).sum();
        if answer.chars().count() as f64 > source_len as f64 * ELABORATION_RATIO {
            issues.push(HeuristicIssue::Elaboration);
        }
    }

    let source_text = sources.join(" ");
    let mut seen = Vec::new();
    for m in NUMBER_WITH_UNIT_RE.find_iter(answer) {
        let number = m.as_str().to_string();
        if seen.contains(&number) {
            continue;
        }
        if !source_text.contains(&number) {
            issues.push(HeuristicIssue::UngroundedNumber {
                number: number.clone(),
            });
        }
        seen.push(number);
    }

    for phrase in HEDGING_PHRASES {
        if answer_lower.contains(phrase) {
            issues.push(HeuristicIssue::HedgingPhrase {
                phrase: phrase.to_string(),
            });
        }
    }

    if answer_lower.contains("don't have that information")
        && state.confidence_score < DONT_KNOW_MIN_CONFIDENCE
    {
        issues.push(HeuristicIssue::UnsureNoInfo);
    }

    if !issues.is_empty() {
        tracing::debug!(count = issues.len(), "heuristic issues found");
    }
    HeuristicReport { issues }
}

fn sub_question_addressed(sub_question: &str, answer_lower: &str) -> bool {
    let q = sub_question.to_lowercase();
    let keywords: Vec<&str> = if ["price", "buy", "cost"].iter().any(|k| q.contains(k)) {
        vec!["price", "$", "cost", "buy", "reverb", "listing"]
    } else if ["connect", "cable", "usb"].iter().any(|k| q.contains(k)) {
        vec!["connect", "cable", "usb", "port", "interface"]
    } else if q.contains("how") || q.contains("what") {
        q.split_whitespace().take(3).collect()
    } else {
        Vec::new()
    };
    // "$" is the one short keyword that still carries meaning.
    keywords
        .iter()
        .filter(|k| k.len() > 2 || **k == "$")
        .any(|k| answer_lower.contains(k))
}
