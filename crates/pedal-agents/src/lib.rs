//! Pedal Q&A request orchestration engine.
//!
//! Routes a user question about a guitar pedal to the right specialist,
//! gates the answer on grounding and relevance, and falls back to a
//! categorized message when the answer cannot be trusted.
//!
//! Deterministic pieces (state, preprocessing, gate decisions) live in the
//! `coordination` crate; this crate drives them with async capabilities.

pub mod adapters;
pub mod capabilities;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod orchestrator;
pub mod prompts;
pub mod quality_gate;
pub mod router;
pub mod state_machine;
pub mod synthesizer;
pub mod telemetry;

pub use capabilities::{
    ClassificationRequest, Classifier, ManualAnswer, PricingAnswer, Specialist, SpecialistAnswer,
    SpecialistRegistry, Validator,
};
pub use config::{ConfigError, PedalConfig};
pub use dispatcher::Dispatcher;
pub use errors::{CapabilityError, RetryCategory};
pub use orchestrator::{Orchestrator, StageEvent};
pub use quality_gate::QualityGate;
pub use router::RouterAgent;
pub use state_machine::{PipelineState, StateMachine};
pub use telemetry::RunMetrics;
