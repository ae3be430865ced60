//! Request state threaded through the orchestration pipeline
//!
//! A single [`RequestState`] value is owned by whichever stage is currently
//! running. Concurrent specialist branches receive clones and only the
//! dispatcher folds their results back into the canonical state.

pub mod types;

pub use types::{
    clamp_unit, ConversationTurn, DataSource, Evidence, FallbackReason, Intent, PartialAnswer,
    PricedResult, PricingData, RequestState, Role, SpecialistKind, Stage, StageError,
    TypoCorrection,
};
