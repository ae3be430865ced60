//! Validation planning and outcome application.
//!
//! The gate is split so the async agent only has to make the validator call:
//! [`plan_validation`] decides the path, and the `apply_*` / [`settle`]
//! functions fold the outcome into the state and record the stage.

use serde::{Deserialize, Serialize};

use super::heuristics::{run_heuristics, HeuristicReport};
use super::verdict::ValidationVerdict;
use super::{GateConfig, HeuristicMode};
use crate::state::{Intent, RequestState, Stage};

/// Which answer the validator is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationScope {
    /// The full candidate answer
    Answer,
    /// Only the manual sub-answer of a hybrid request
    ManualPart,
}

impl std::fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Answer => write!(f, "answer"),
            Self::ManualPart => write!(f, "manual part"),
        }
    }
}

/// The path a state takes through the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationPlan {
    /// Canned or meta answers are valid as-is
    SkipProtected,
    /// Hybrid request where only pricing came back; nothing to ground
    PricingOnlyHybrid,
    /// Pricing request with a valid priced result
    PricingPass,
    /// No evidence or no answer; flagged without calling the validator
    MissingInputs,
    /// Heuristics flagged grounding problems in gating mode
    HeuristicReject { report: HeuristicReport },
    /// Ask the validator about `answer` against `evidence`
    Validate {
        scope: ValidationScope,
        answer: String,
        evidence: Vec<String>,
        report: HeuristicReport,
    },
}

impl ValidationPlan {
    pub fn needs_validator(&self) -> bool {
        matches!(self, Self::Validate { .. })
    }
}

/// Reset gate-owned fields so validating the same state twice gives the
/// same result.
pub fn prepare(state: &mut RequestState) {
    match state.pre_gate_confidence {
        Some(original) => state.confidence_score = original,
        None => state.pre_gate_confidence = Some(state.confidence_score),
    }
    state.hallucination_flag = false;
    state.needs_human_review = false;
    state.quality_notes.clear();
}

/// Choose the validation path for a state.
pub fn plan_validation(state: &RequestState, config: &GateConfig) -> ValidationPlan {
    if state.protected_answer {
        return ValidationPlan::SkipProtected;
    }

    if state.intent == Some(Intent::Hybrid) && state.hybrid_partial_success {
        if let Some(manual) = state.manual_partial_text().filter(|_| state.has_evidence()) {
            return validate_or_reject(state, config, ValidationScope::ManualPart, manual);
        }
        if state.has_valid_pricing() {
            return ValidationPlan::PricingOnlyHybrid;
        }
    }

    if state.intent == Some(Intent::Pricing) && state.has_valid_pricing() {
        return ValidationPlan::PricingPass;
    }

    match state.raw_answer.as_deref() {
        Some(answer) if !answer.trim().is_empty() && state.has_evidence() => {
            validate_or_reject(state, config, ValidationScope::Answer, answer)
        }
        _ => ValidationPlan::MissingInputs,
    }
}

fn validate_or_reject(
    state: &RequestState,
    config: &GateConfig,
    scope: ValidationScope,
    answer: &str,
) -> ValidationPlan {
    let report = run_heuristics(state, answer);
    if config.heuristic_mode == HeuristicMode::Gating && report.has_grounding_issue() {
        return ValidationPlan::HeuristicReject { report };
    }
    ValidationPlan::Validate {
        scope,
        answer: answer.to_string(),
        evidence: state.evidence_texts(),
        report,
    }
}

/// Apply every plan that does not involve the validator.
pub fn settle(state: &mut RequestState, plan: &ValidationPlan, config: &GateConfig) {
    match plan {
        ValidationPlan::SkipProtected => {
            tracing::info!("protected answer, validation skipped");
            state.visit(Stage::QualityCheck);
        }
        ValidationPlan::PricingOnlyHybrid => {
            tracing::info!("hybrid pricing-only success, no evidence to validate");
            state.visit(Stage::QualityCheck);
        }
        ValidationPlan::PricingPass => {
            let floored = state.confidence_score.max(config.pricing_confidence_floor);
            state.set_confidence(floored);
            tracing::info!(confidence = state.confidence_score, "priced result accepted");
            state.visit(Stage::QualityCheck);
        }
        ValidationPlan::MissingInputs => {
            let cause = if state.has_answer() {
                "no evidence retrieved"
            } else {
                "no answer generated"
            };
            tracing::warn!(cause, "validation skipped");
            state.hallucination_flag = true;
            state.needs_human_review = true;
            state
                .quality_notes
                .push(format!("Quality check skipped: {cause}"));
            state.visit(Stage::QualityCheckSkipped);
        }
        ValidationPlan::HeuristicReject { report } => {
            tracing::warn!(issues = report.issues.len(), "heuristics flagged ungrounded content");
            state.hallucination_flag = true;
            state.needs_human_review = true;
            state.quality_notes.extend(report.notes());
            state.visit(Stage::QualityCheck);
        }
        ValidationPlan::Validate { .. } => {
            tracing::debug!("validate plan settled without a verdict");
        }
    }
}

/// Fold a validator verdict into the state.
pub fn apply_verdict(
    state: &mut RequestState,
    scope: ValidationScope,
    verdict: &ValidationVerdict,
    report: &HeuristicReport,
) {
    state.quality_notes.extend(report.notes());
    state.quality_notes.extend(verdict.notes(&scope.to_string()));
    state.hallucination_flag = verdict.hallucination_detected;
    state.needs_human_review = !verdict.is_accurate;

    if scope == ValidationScope::Answer && !verdict.is_accurate {
        let halved = state.confidence_score * 0.5;
        state.set_confidence(halved);
    }

    if state.hallucination_flag {
        tracing::warn!(scope = %scope, confidence = state.confidence_score, "hallucination detected");
    } else {
        tracing::info!(scope = %scope, accurate = verdict.is_accurate, "quality check passed");
    }
    state.visit(Stage::QualityCheck);
}

/// Record a failed validator call. Not fatal: the answer is kept and marked
/// for review.
pub fn apply_validator_error(
    state: &mut RequestState,
    scope: ValidationScope,
    error: &str,
    report: &HeuristicReport,
) {
    tracing::warn!(scope = %scope, error, "validator call failed");
    state.quality_notes.extend(report.notes());
    state
        .quality_notes
        .push(format!("Quality check ({scope}) unavailable: {error}"));
    state.needs_human_review = true;
    state.visit(Stage::QualityCheckError);
}
