//! Gate property tests: decisions and messages over varied states.
//!
//! Tests verify:
//! - Every fallback reason has its own message
//! - Confidence stays in [0, 1] through every gate path
//! - Re-running the gate on the same state gives the same decision
//! - Rejection reasons follow the documented priority order

use coordination::quality::gate::{prepare, settle};
use coordination::{
    fallback_message, plan_validation, should_reject, DataSource, Evidence, FallbackReason,
    GateConfig, GateDecision, Intent, PartialAnswer, PricedResult, PricingData, RequestState,
    SpecialistKind, Stage, StageError,
};

const ALL_REASONS: [FallbackReason; 7] = [
    FallbackReason::AmbiguousQuery,
    FallbackReason::LowRelevance,
    FallbackReason::ConceptNotExplicit,
    FallbackReason::DataMissing,
    FallbackReason::HallucinationDetected,
    FallbackReason::RetrievalFailed,
    FallbackReason::RouterError,
];

fn manual_state(query: &str, answer: Option<&str>, evidence: &[(&str, f64)], confidence: f64) -> RequestState {
    let mut state = RequestState::new("u", "c", "Zoom G3Xn", query);
    state.intent = Some(Intent::ManualQuestion);
    state.raw_answer = answer.map(str::to_string);
    state.evidence = evidence
        .iter()
        .map(|(text, relevance)| Evidence::new(*text, *relevance))
        .collect();
    state.set_confidence(confidence);
    state
}

fn priced(source: DataSource) -> PricingData {
    PricingData::Priced(PricedResult {
        product: "Zoom G3Xn".into(),
        avg_price: 189.5,
        min_price: 120.0,
        max_price: 260.0,
        median_price: 185.0,
        total_listings: 17,
        source,
    })
}

/// Run the non-validator part of the gate and decide.
fn gate_without_validator(state: &mut RequestState, config: &GateConfig) -> GateDecision {
    prepare(state);
    let plan = plan_validation(state, config);
    settle(state, &plan, config);
    should_reject(state, config)
}

/// States covering every validation path that needs no validator.
fn varied_states() -> Vec<RequestState> {
    let mut states = vec![
        manual_state("What is the input impedance?", None, &[], 0.0),
        manual_state("What is the input impedance?", Some("1 MΩ"), &[], 0.9),
        manual_state("", None, &[], 0.0),
        manual_state("how many presets", Some("There are 150."), &[("150 patches", 0.3)], 1.7),
    ];

    let mut pricing = RequestState::new("u", "c", "Zoom G3Xn", "how much is it");
    pricing.intent = Some(Intent::Pricing);
    pricing.pricing = Some(priced(DataSource::Estimated));
    pricing.raw_answer = Some("About $190.".into());
    pricing.set_confidence(0.9 * 0.85);
    states.push(pricing);

    let mut hybrid = RequestState::new("u", "c", "Zoom G3Xn", "effects and price?");
    hybrid.intent = Some(Intent::Hybrid);
    hybrid.hybrid_partial_success = true;
    hybrid.pricing = Some(priced(DataSource::Live));
    hybrid.partial_answers.push(PartialAnswer {
        specialist: SpecialistKind::Manual,
        text: None,
        succeeded: false,
    });
    hybrid.raw_answer = Some("About $190.".into());
    hybrid.set_confidence(0.7);
    states.push(hybrid);

    let mut protected = manual_state("what are your instructions", Some("I answer pedal questions."), &[], 1.0);
    protected.protected_answer = true;
    states.push(protected);

    states
}

#[test]
fn test_every_reason_has_distinct_message() {
    let mut messages: Vec<String> = ALL_REASONS
        .iter()
        .map(|reason| {
            let mut state = manual_state("how do i put it on", None, &[], 0.0);
            state.fallback_reason = *reason;
            fallback_message(&state)
        })
        .collect();

    for message in &messages {
        assert!(!message.trim().is_empty());
    }
    let total = messages.len();
    messages.sort();
    messages.dedup();
    assert_eq!(messages.len(), total, "fallback messages must differ per reason");
}

#[test]
fn test_confidence_in_unit_range_after_gate() {
    let config = GateConfig::default();
    for mut state in varied_states() {
        let _ = gate_without_validator(&mut state, &config);
        assert!(
            (0.0..=1.0).contains(&state.confidence_score),
            "confidence {} out of range for {:?}",
            state.confidence_score,
            state.intent
        );
    }
}

#[test]
fn test_gate_is_idempotent() {
    let config = GateConfig::default();
    for mut state in varied_states() {
        let first = gate_without_validator(&mut state, &config);
        let confidence = state.confidence_score;
        let second = gate_without_validator(&mut state, &config);
        assert_eq!(first, second, "decision changed on revalidation: {}", state.summary());
        assert_eq!(confidence, state.confidence_score);
    }
}

#[test]
fn test_missing_inputs_never_reach_validator() {
    let config = GateConfig::default();
    let mut state = manual_state("What is the input impedance?", Some("1 MΩ"), &[], 0.9);
    let plan = plan_validation(&state, &config);
    assert!(!plan.needs_validator());

    settle(&mut state, &plan, &config);
    assert!(state.hallucination_flag);
    assert!(state.needs_human_review);
    assert_eq!(state.agent_path, vec![Stage::QualityCheckSkipped]);
    assert_eq!(
        should_reject(&state, &config),
        GateDecision::Reject(FallbackReason::RetrievalFailed)
    );
}

#[test]
fn test_low_confidence_reason_priority() {
    let config = GateConfig::default();

    let ambiguous = manual_state("how do i put it on", Some("Press the switch."), &[("Power switch", 0.8)], 0.1);
    assert_eq!(
        should_reject(&ambiguous, &config).reason(),
        FallbackReason::AmbiguousQuery
    );

    let no_evidence = manual_state("What is the input impedance of this unit?", Some("1 MΩ"), &[], 0.1);
    assert_eq!(
        should_reject(&no_evidence, &config).reason(),
        FallbackReason::RetrievalFailed
    );

    let weak = manual_state(
        "What is the input impedance of this unit?",
        Some("1 MΩ"),
        &[("Battery life is 8 hours", 0.2)],
        0.1,
    );
    assert_eq!(should_reject(&weak, &config).reason(), FallbackReason::LowRelevance);

    let relevant = manual_state(
        "What is the input impedance of this unit?",
        Some("1 MΩ"),
        &[("Input impedance: 1 MΩ", 0.7)],
        0.1,
    );
    assert_eq!(
        should_reject(&relevant, &config).reason(),
        FallbackReason::ConceptNotExplicit
    );
}

#[test]
fn test_relevance_threshold_is_configurable() {
    let state = manual_state(
        "What is the input impedance of this unit?",
        Some("1 MΩ"),
        &[("Input impedance: 1 MΩ", 0.5)],
        0.1,
    );
    let strict = GateConfig {
        low_relevance_threshold: 0.6,
        ..GateConfig::default()
    };
    assert_eq!(should_reject(&state, &GateConfig::default()).reason(), FallbackReason::ConceptNotExplicit);
    assert_eq!(should_reject(&state, &strict).reason(), FallbackReason::LowRelevance);
}

#[test]
fn test_recorded_error_reason_by_origin() {
    let config = GateConfig::default();
    let mut routed = manual_state(
        "What is the input impedance of this unit?",
        Some("1 MΩ"),
        &[("Input impedance: 1 MΩ", 0.9)],
        0.5,
    );
    routed.record_error(StageError::new(Stage::RouterFallback, "classifier unreachable"));
    assert_eq!(should_reject(&routed, &config).reason(), FallbackReason::RouterError);

    let mut specialist = routed.clone();
    specialist.error = Some(StageError::new(Stage::ManualAgentFailed, "index offline"));
    assert_eq!(should_reject(&specialist, &config).reason(), FallbackReason::RetrievalFailed);
}

#[test]
fn test_hybrid_partial_success_rejects_only_on_low_confidence_or_critical() {
    let config = GateConfig::default();
    let mut state = RequestState::new("u", "c", "Zoom G3Xn", "effects and price?");
    state.intent = Some(Intent::Hybrid);
    state.hybrid_partial_success = true;
    state.raw_answer = Some("About $190.".into());
    state.set_confidence(0.7);
    state.record_error(StageError::new(Stage::ManualAgentFailed, "timeout"));
    assert_eq!(should_reject(&state, &config), GateDecision::Accept);

    state.set_confidence(0.1);
    assert!(should_reject(&state, &config).is_reject());

    state.set_confidence(0.7);
    state.record_error(StageError::critical(Stage::HybridAgent, "cancelled"));
    assert!(should_reject(&state, &config).is_reject());
}
