//! Pedal Q&A coordination library
//!
//! Deterministic building blocks for the request orchestration engine. No
//! async and no I/O live here; the agent crate drives these pieces.
//!
//! - [`state`]: the [`RequestState`] threaded through every stage
//! - [`preprocess`]: typo correction and multi-question splitting
//! - [`router`]: casual detection, keyword fallback, classifier output parsing
//! - [`quality`]: heuristic checks, verdict parsing, the accept / reject decision
//! - [`resilience`]: degradation grading for hybrid fan-out
//! - [`merge`]: combining hybrid specialist outputs
//! - [`fallback`]: user-facing messages for rejected answers

#![allow(clippy::uninlined_format_args)]

pub mod fallback;
pub mod json_extract;
pub mod merge;
pub mod preprocess;
pub mod quality;
pub mod resilience;
pub mod router;
pub mod state;

// Re-export key state types
pub use state::{
    ConversationTurn, DataSource, Evidence, FallbackReason, Intent, PartialAnswer, PricedResult,
    PricingData, RequestState, Role, SpecialistKind, Stage, StageError, TypoCorrection,
};

// Re-export quality gate types
pub use quality::{
    plan_validation, should_reject, GateConfig, GateDecision, HeuristicMode, ValidationPlan,
    ValidationScope, ValidationVerdict,
};

// Re-export resilience types
pub use resilience::{BranchReport, DegradationLevel, HybridAssessment};

pub use fallback::{fallback_message, GENERIC_ERROR_MESSAGE};
pub use merge::{merge_hybrid, HybridParts};
pub use preprocess::{preprocess, PreprocessResult};
pub use router::{parse_classification, Classification};
