//! Core types for the request lifecycle
//!
//! A [`RequestState`] is created once per user question and handed by value
//! from stage to stage. Every stage that changes the answer, the evidence or
//! the confidence does so explicitly through the methods on this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of intents a question can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Answerable from the product manual or spec sheet
    ManualQuestion,
    /// Market price, value or availability
    Pricing,
    /// Tone / usage advice not tied to a documented fact
    Explanation,
    /// Needs more than one specialist (e.g. manual + pricing)
    Hybrid,
    /// Greetings and small talk
    Casual,
}

impl Intent {
    /// Parse a classifier label. Accepts `MANUAL_QUESTION`, `manual_question`
    /// and `manual-question` spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "manual_question" | "manual" => Some(Self::ManualQuestion),
            "pricing" | "price" => Some(Self::Pricing),
            "explanation" => Some(Self::Explanation),
            "hybrid" => Some(Self::Hybrid),
            "casual" => Some(Self::Casual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualQuestion => "manual_question",
            Self::Pricing => "pricing",
            Self::Explanation => "explanation",
            Self::Hybrid => "hybrid",
            Self::Casual => "casual",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate answer was rejected. Drives the user-facing message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    #[default]
    None,
    /// Query too vague to answer without clarification
    AmbiguousQuery,
    /// Evidence was retrieved but does not match the question
    LowRelevance,
    /// Evidence is relevant but the concept is not stated explicitly
    ConceptNotExplicit,
    /// Information genuinely absent from the source material
    DataMissing,
    /// Answer contained claims not supported by the evidence
    HallucinationDetected,
    /// No evidence at all, or no answer was produced
    RetrievalFailed,
    /// Intent classification failed
    RouterError,
}

impl FallbackReason {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AmbiguousQuery => "ambiguous_query",
            Self::LowRelevance => "low_relevance",
            Self::ConceptNotExplicit => "concept_not_explicit",
            Self::DataMissing => "data_missing",
            Self::HallucinationDetected => "hallucination_detected",
            Self::RetrievalFailed => "retrieval_failed",
            Self::RouterError => "router_error",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specialist capabilities the engine can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    /// Manual lookup over retrieved documentation
    Manual,
    /// Market pricing
    Pricing,
}

impl SpecialistKind {
    /// Stage recorded when this specialist produced usable output.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Manual => Stage::ManualAgent,
            Self::Pricing => Stage::PricingAgent,
        }
    }

    /// Stage recorded when this specialist errored, timed out or came back empty.
    pub fn failed_stage(&self) -> Stage {
        match self {
            Self::Manual => Stage::ManualAgentFailed,
            Self::Pricing => Stage::PricingAgentFailed,
        }
    }
}

impl std::fmt::Display for SpecialistKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Pricing => write!(f, "pricing"),
        }
    }
}

/// Pipeline stages as recorded in `agent_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Router,
    RouterFallback,
    ManualAgent,
    ManualAgentFailed,
    ManualAgentSkipped,
    PricingAgent,
    PricingAgentFailed,
    HybridAgent,
    QualityCheck,
    QualityCheckSkipped,
    QualityCheckError,
    Synthesizer,
    Fallback,
    /// Unhandled failure caught at the `run` boundary
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::RouterFallback => "router_fallback",
            Self::ManualAgent => "manual_agent",
            Self::ManualAgentFailed => "manual_agent_failed",
            Self::ManualAgentSkipped => "manual_agent_skipped",
            Self::PricingAgent => "pricing_agent",
            Self::PricingAgentFailed => "pricing_agent_failed",
            Self::HybridAgent => "hybrid_agent",
            Self::QualityCheck => "quality_check",
            Self::QualityCheckSkipped => "quality_check_skipped",
            Self::QualityCheckError => "quality_check_error",
            Self::Synthesizer => "synthesizer",
            Self::Fallback => "fallback",
            Self::Error => "error",
        }
    }

    /// Whether the stage belongs to intent routing.
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::Router | Self::RouterFallback)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// A previous message in the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single typo fix applied during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypoCorrection {
    pub original: String,
    pub corrected: String,
    /// Word index in the corrected query
    pub position: usize,
}

/// A retrieved snippet with its relevance score.
///
/// Snippets and scores travel together so the two lists can never diverge
/// in length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub relevance: f64,
}

impl Evidence {
    pub fn new(text: impl Into<String>, relevance: f64) -> Self {
        Self {
            text: text.into(),
            relevance: relevance.clamp(0.0, 1.0),
        }
    }
}

/// Where priced data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Live marketplace listings
    Live,
    /// Estimated or simulated data used when the live source is unavailable
    Estimated,
}

impl DataSource {
    pub fn is_low_trust(&self) -> bool {
        matches!(self, Self::Estimated)
    }
}

/// Market statistics for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedResult {
    pub product: String,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub median_price: f64,
    pub total_listings: u32,
    pub source: DataSource,
}

impl PricedResult {
    /// One-paragraph summary used when the pricing specialist sent no prose.
    pub fn summary(&self) -> String {
        format!(
            "Based on {} active listings, the **{}** typically sells for **${:.2}**. \
             Prices range from ${:.2} to ${:.2}, depending on condition.",
            self.total_listings, self.product, self.avg_price, self.min_price, self.max_price
        )
    }
}

/// Pricing outcome. `Unavailable` is the error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PricingData {
    Priced(PricedResult),
    Unavailable { error: String },
}

impl PricingData {
    pub fn priced(&self) -> Option<&PricedResult> {
        match self {
            Self::Priced(result) => Some(result),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.priced().is_some()
    }

    pub fn is_low_trust(&self) -> bool {
        self.priced().is_some_and(|p| p.source.is_low_trust())
    }
}

/// Per-specialist answer kept for hybrid requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialAnswer {
    pub specialist: SpecialistKind,
    pub text: Option<String>,
    pub succeeded: bool,
}

/// An error recorded by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
    /// Critical errors reject even partially successful hybrid answers
    #[serde(default)]
    pub critical: bool,
}

impl StageError {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            critical: false,
        }
    }

    pub fn critical(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            critical: true,
        }
    }

    pub fn originated_in_routing(&self) -> bool {
        self.stage.is_routing()
    }

    /// The rejection reason this error maps to if the gate rejects on it.
    pub fn fallback_reason(&self) -> FallbackReason {
        if self.originated_in_routing() {
            FallbackReason::RouterError
        } else {
            FallbackReason::RetrievalFailed
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)?;
        if self.critical {
            write!(f, " (critical)")?;
        }
        Ok(())
    }
}

/// The record threaded through every stage of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    // ── Identity ──────────────────────────────────────────────────────────
    pub requester_id: String,
    pub conversation_id: String,
    /// Product the question is about; classification may correct it
    pub subject: String,

    // ── Input ─────────────────────────────────────────────────────────────
    pub query: String,
    pub normalized_query: String,
    #[serde(default)]
    pub sub_questions: Vec<String>,
    #[serde(default)]
    pub typos_corrected: Vec<TypoCorrection>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,

    // ── Classification ───────────────────────────────────────────────────
    pub intent: Option<Intent>,
    pub classification_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_rationale: Option<String>,

    // ── Evidence ─────────────────────────────────────────────────────────
    #[serde(default)]
    pub evidence: Vec<Evidence>,

    // ── Candidate output ─────────────────────────────────────────────────
    pub raw_answer: Option<String>,
    #[serde(default)]
    pub partial_answers: Vec<PartialAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingData>,
    pub final_answer: Option<String>,

    // ── Quality flags ────────────────────────────────────────────────────
    pub hallucination_flag: bool,
    pub confidence_score: f64,
    pub needs_human_review: bool,
    pub fallback_reason: FallbackReason,
    /// Canned/meta answers that must not be validated against evidence
    #[serde(default)]
    pub protected_answer: bool,
    #[serde(default)]
    pub hybrid_partial_success: bool,
    /// The manual specialist reported no indexed documentation for the subject
    #[serde(default)]
    pub subject_undocumented: bool,
    /// Confidence as it stood when the gate first saw this state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_gate_confidence: Option<f64>,
    /// Validator reasoning, issues and heuristic findings
    #[serde(default)]
    pub quality_notes: Vec<String>,

    // ── Bookkeeping ──────────────────────────────────────────────────────
    #[serde(default)]
    pub agent_path: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl RequestState {
    /// Create a fresh state from identity and raw input.
    pub fn new(
        requester_id: impl Into<String>,
        conversation_id: impl Into<String>,
        subject: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        let query = query.into();
        Self {
            requester_id: requester_id.into(),
            conversation_id: conversation_id.into(),
            subject: subject.into(),
            normalized_query: query.clone(),
            query,
            sub_questions: Vec::new(),
            typos_corrected: Vec::new(),
            conversation_history: Vec::new(),
            intent: None,
            classification_confidence: 0.0,
            classification_rationale: None,
            evidence: Vec::new(),
            raw_answer: None,
            partial_answers: Vec::new(),
            pricing: None,
            final_answer: None,
            hallucination_flag: false,
            confidence_score: 0.0,
            needs_human_review: false,
            fallback_reason: FallbackReason::None,
            protected_answer: false,
            hybrid_partial_success: false,
            subject_undocumented: false,
            pre_gate_confidence: None,
            quality_notes: Vec::new(),
            agent_path: Vec::new(),
            error: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.conversation_history = history;
        self
    }

    /// Append a stage to the audit trail.
    pub fn visit(&mut self, stage: Stage) {
        tracing::debug!(stage = %stage, path_len = self.agent_path.len() + 1, "stage visited");
        self.agent_path.push(stage);
    }

    /// Set the confidence score, clamped to [0, 1]. NaN maps to 0.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence_score = clamp_unit(confidence);
    }

    /// Record a stage error. A critical error already on record is kept.
    pub fn record_error(&mut self, error: StageError) {
        if self.error.as_ref().is_some_and(|e| e.critical) && !error.critical {
            tracing::debug!(ignored = %error, "critical error already recorded");
            return;
        }
        self.error = Some(error);
    }

    /// Whether the normalized query carries any text.
    pub fn has_query(&self) -> bool {
        !self.normalized_query.trim().is_empty()
    }

    pub fn has_evidence(&self) -> bool {
        !self.evidence.is_empty()
    }

    pub fn has_answer(&self) -> bool {
        self.raw_answer
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty())
    }

    pub fn has_valid_pricing(&self) -> bool {
        self.pricing.as_ref().is_some_and(PricingData::is_valid)
    }

    pub fn top_relevance(&self) -> Option<f64> {
        self.evidence
            .iter()
            .map(|e| e.relevance)
            .fold(None, |best, r| Some(best.map_or(r, |b: f64| b.max(r))))
    }

    pub fn evidence_texts(&self) -> Vec<String> {
        self.evidence.iter().map(|e| e.text.clone()).collect()
    }

    pub fn relevance_scores(&self) -> Vec<f64> {
        self.evidence.iter().map(|e| e.relevance).collect()
    }

    /// Replace the evidence from parallel snippet / score lists.
    ///
    /// Lists of different length are truncated to the shorter one.
    pub fn set_evidence(&mut self, snippets: Vec<String>, scores: Vec<f64>) {
        if snippets.len() != scores.len() {
            tracing::warn!(
                snippets = snippets.len(),
                scores = scores.len(),
                "evidence and relevance lengths differ, truncating"
            );
        }
        self.evidence = snippets
            .into_iter()
            .zip(scores)
            .map(|(text, relevance)| Evidence::new(text, relevance))
            .collect();
    }

    pub fn partial(&self, specialist: SpecialistKind) -> Option<&PartialAnswer> {
        self.partial_answers
            .iter()
            .find(|p| p.specialist == specialist)
    }

    /// The manual sub-answer of a hybrid request, if it came back with text.
    pub fn manual_partial_text(&self) -> Option<&str> {
        self.partial(SpecialistKind::Manual)
            .and_then(|p| p.text.as_deref())
    }

    /// Compact one-line status for logs.
    pub fn summary(&self) -> String {
        let path: Vec<&str> = self.agent_path.iter().map(Stage::as_str).collect();
        format!(
            "intent={} confidence={:.2} hallucination={} review={} fallback={} path=[{}]",
            self.intent.map_or("unclassified", |i| i.as_str()),
            self.confidence_score,
            self.hallucination_flag,
            self.needs_human_review,
            self.fallback_reason,
            path.join(" → ")
        )
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_label_parsing() {
        assert_eq!(
            Intent::from_label("MANUAL_QUESTION"),
            Some(Intent::ManualQuestion)
        );
        assert_eq!(Intent::from_label(" hybrid "), Some(Intent::Hybrid));
        assert_eq!(Intent::from_label("Pricing"), Some(Intent::Pricing));
        assert_eq!(Intent::from_label("weather"), None);
    }

    #[test]
    fn test_new_state_defaults() {
        let state = RequestState::new("u1", "c1", "Boss DS-1", "What is the input impedance?");
        assert_eq!(state.normalized_query, "What is the input impedance?");
        assert_eq!(state.fallback_reason, FallbackReason::None);
        assert!(state.agent_path.is_empty());
        assert!(state.error.is_none());
        assert!(state.has_query());
    }

    #[test]
    fn test_set_confidence_clamps() {
        let mut state = RequestState::new("u", "c", "p", "q");
        state.set_confidence(1.7);
        assert_eq!(state.confidence_score, 1.0);
        state.set_confidence(-0.3);
        assert_eq!(state.confidence_score, 0.0);
        state.set_confidence(f64::NAN);
        assert_eq!(state.confidence_score, 0.0);
    }

    #[test]
    fn test_set_evidence_truncates_to_shorter_list() {
        let mut state = RequestState::new("u", "c", "p", "q");
        state.set_evidence(
            vec!["a".into(), "b".into(), "c".into()],
            vec![0.9, 0.5],
        );
        assert_eq!(state.evidence.len(), 2);
        assert_eq!(state.relevance_scores(), vec![0.9, 0.5]);
        assert_eq!(state.top_relevance(), Some(0.9));
    }

    #[test]
    fn test_record_error_keeps_critical() {
        let mut state = RequestState::new("u", "c", "p", "q");
        state.record_error(StageError::critical(Stage::HybridAgent, "dispatch aborted"));
        state.record_error(StageError::new(Stage::QualityCheck, "minor"));
        assert!(state.error.as_ref().unwrap().critical);
    }

    #[test]
    fn test_stage_error_reason_mapping() {
        assert_eq!(
            StageError::new(Stage::RouterFallback, "timeout").fallback_reason(),
            FallbackReason::RouterError
        );
        assert_eq!(
            StageError::new(Stage::ManualAgent, "boom").fallback_reason(),
            FallbackReason::RetrievalFailed
        );
    }

    #[test]
    fn test_pricing_validity_and_trust() {
        let priced = PricingData::Priced(PricedResult {
            product: "Boss DS-1".into(),
            avg_price: 49.0,
            min_price: 30.0,
            max_price: 70.0,
            median_price: 48.0,
            total_listings: 12,
            source: DataSource::Estimated,
        });
        assert!(priced.is_valid());
        assert!(priced.is_low_trust());

        let missing = PricingData::Unavailable {
            error: "timeout".into(),
        };
        assert!(!missing.is_valid());
        assert!(!missing.is_low_trust());
    }

    #[test]
    fn test_state_serde_roundtrip_keeps_path() {
        let mut state = RequestState::new("u", "c", "p", "q");
        state.visit(Stage::Router);
        state.visit(Stage::ManualAgent);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"manual_agent\""));
        let restored: RequestState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.agent_path, vec![Stage::Router, Stage::ManualAgent]);
    }
}
