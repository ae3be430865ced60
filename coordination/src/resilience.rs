//! Hybrid degradation levels
//!
//! A hybrid request fans out to several specialists. Instead of failing when
//! one of them does, the dispatcher grades how much of the request could be
//! served and derives a combined confidence from that grade.
//!
//! ```text
//! Branches usable    | Level        | Base confidence
//! -------------------|--------------|----------------
//! all                | Full         | 0.9
//! some               | Partial      | 0.7
//! none               | Unavailable  | 0.2
//! ```
//!
//! Any used branch backed by low-trust data (estimated / simulated) scales
//! the base confidence by the configured penalty.

use serde::{Deserialize, Serialize};

use crate::state::SpecialistKind;

/// How much of a multi-branch request could be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every branch returned usable data.
    Full,
    /// At least one branch, but not all.
    Partial,
    /// No branch returned usable data.
    Unavailable,
}

impl DegradationLevel {
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if total > 0 && succeeded >= total {
            Self::Full
        } else if succeeded > 0 {
            Self::Partial
        } else {
            Self::Unavailable
        }
    }

    pub fn base_confidence(&self) -> f64 {
        match self {
            Self::Full => 0.9,
            Self::Partial => 0.7,
            Self::Unavailable => 0.2,
        }
    }

    /// Whether anything usable came back.
    pub fn any_usable(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Settled state of one fan-out branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchReport {
    pub specialist: SpecialistKind,
    pub usable: bool,
    /// Data came from a low-trust fallback source
    pub low_trust: bool,
    /// Failure description when the branch errored, panicked or timed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Degradation grade of a whole fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridAssessment {
    pub level: DegradationLevel,
    pub confidence: f64,
    pub succeeded: usize,
    pub total: usize,
    pub low_trust: bool,
}

impl HybridAssessment {
    /// Grade a set of settled branches.
    pub fn assess(branches: &[BranchReport], low_trust_penalty: f64) -> Self {
        let succeeded = branches.iter().filter(|b| b.usable).count();
        let total = branches.len();
        let level = DegradationLevel::from_counts(succeeded, total);
        let low_trust = branches.iter().any(|b| b.usable && b.low_trust);

        let mut confidence = level.base_confidence();
        if low_trust {
            confidence *= low_trust_penalty;
        }

        Self {
            level,
            confidence: confidence.clamp(0.0, 1.0),
            succeeded,
            total,
            low_trust,
        }
    }

    pub fn partial_success(&self) -> bool {
        self.level.any_usable()
    }
}
