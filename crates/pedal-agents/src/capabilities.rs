//! External capability interfaces.
//!
//! The engine never talks to a model or a retrieval service directly. It
//! consumes three capabilities:
//!
//! - [`Classifier`]: query + context → intent verdict
//! - [`Specialist`]: request → answer (+ evidence or priced result)
//! - [`Validator`]: answer + evidence → accuracy verdict
//!
//! Adapters over HTTP live in [`crate::adapters`]; tests plug in fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use coordination::{Classification, PricingData, RequestState, SpecialistKind, ValidationVerdict};
use serde::{Deserialize, Serialize};

use crate::errors::CapabilityError;

/// Input handed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    /// Normalized query
    pub query: String,
    /// Product the user selected
    pub subject: String,
    /// Recent conversation, oldest first, already truncated
    pub context: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, CapabilityError>;
}

/// Output of the manual specialist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualAnswer {
    pub text: String,
    pub evidence: Vec<String>,
    /// One score per evidence snippet
    pub relevance: Vec<f64>,
    pub confidence: f64,
    /// Canned or meta reply that must not be validated against evidence
    pub protected: bool,
    /// No documentation is indexed for the subject
    pub subject_undocumented: bool,
}

/// Output of the pricing specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingAnswer {
    #[serde(default)]
    pub text: Option<String>,
    pub pricing: PricingData,
}

/// What a specialist brought back.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialistAnswer {
    Manual(ManualAnswer),
    Pricing(PricingAnswer),
}

impl SpecialistAnswer {
    pub fn kind(&self) -> SpecialistKind {
        match self {
            Self::Manual(_) => SpecialistKind::Manual,
            Self::Pricing(_) => SpecialistKind::Pricing,
        }
    }

    /// Whether the answer carries data the engine can stand behind: evidence
    /// for manual answers, a priced result for pricing answers.
    pub fn is_usable(&self) -> bool {
        match self {
            Self::Manual(answer) => !answer.evidence.is_empty(),
            Self::Pricing(answer) => answer.pricing.is_valid(),
        }
    }

    pub fn is_low_trust(&self) -> bool {
        match self {
            Self::Manual(_) => false,
            Self::Pricing(answer) => answer.pricing.is_low_trust(),
        }
    }

    /// Answer text, if any. Empty strings count as no text.
    pub fn text(&self) -> Option<&str> {
        let text = match self {
            Self::Manual(answer) => Some(answer.text.as_str()),
            Self::Pricing(answer) => answer.text.as_deref(),
        };
        text.filter(|t| !t.trim().is_empty())
    }
}

#[async_trait]
pub trait Specialist: Send + Sync {
    fn kind(&self) -> SpecialistKind;

    /// Answer the request. The state is a read-only snapshot.
    async fn answer(&self, state: &RequestState) -> Result<SpecialistAnswer, CapabilityError>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        answer: &str,
        evidence: &[String],
    ) -> Result<ValidationVerdict, CapabilityError>;
}

/// Specialists keyed by capability.
#[derive(Clone, Default)]
pub struct SpecialistRegistry {
    specialists: BTreeMap<SpecialistKind, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a specialist, replacing any previous one of the same kind.
    pub fn register(&mut self, specialist: Arc<dyn Specialist>) -> &mut Self {
        self.specialists.insert(specialist.kind(), specialist);
        self
    }

    pub fn with(mut self, specialist: Arc<dyn Specialist>) -> Self {
        self.register(specialist);
        self
    }

    pub fn get(&self, kind: SpecialistKind) -> Option<Arc<dyn Specialist>> {
        self.specialists.get(&kind).cloned()
    }

    /// Every registered specialist in a stable order (manual before pricing).
    pub fn all(&self) -> impl Iterator<Item = Arc<dyn Specialist>> + '_ {
        self.specialists.values().cloned()
    }

    pub fn kinds(&self) -> Vec<SpecialistKind> {
        self.specialists.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

impl fmt::Debug for SpecialistRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecialistRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
