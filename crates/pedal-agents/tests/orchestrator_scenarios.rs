//! End-to-end runs of the orchestrator with in-process capabilities.
//!
//! Every collaborator is a small fake so the scenarios exercise the real
//! router, dispatcher, gate and responders without any network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    Classification, DataSource, FallbackReason, GateConfig, Intent, PricedResult, PricingData,
    RequestState, SpecialistKind, Stage, ValidationVerdict,
};
use futures::StreamExt;
use pedal_agents::{
    CapabilityError, ClassificationRequest, Classifier, Dispatcher, ManualAnswer, Orchestrator,
    PricingAnswer, QualityGate, RouterAgent, Specialist, SpecialistAnswer, SpecialistRegistry,
    Validator,
};

// ── Fakes ────────────────────────────────────────────────────────────────

enum ClassifierBehavior {
    Fixed(Intent),
    Unreachable,
}

struct FakeClassifier {
    behavior: ClassifierBehavior,
    calls: AtomicUsize,
}

impl FakeClassifier {
    fn fixed(intent: Intent) -> Arc<Self> {
        Arc::new(Self {
            behavior: ClassifierBehavior::Fixed(intent),
            calls: AtomicUsize::new(0),
        })
    }

    fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            behavior: ClassifierBehavior::Unreachable,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(
        &self,
        _request: &ClassificationRequest,
    ) -> Result<Classification, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ClassifierBehavior::Fixed(intent) => Ok(Classification {
                intent,
                subject: None,
                confidence: 0.92,
                rationale: "test".into(),
            }),
            ClassifierBehavior::Unreachable => {
                Err(CapabilityError::Transport("connection refused".into()))
            }
        }
    }
}

/// Manual specialist returning a fixed answer, or failing.
struct FakeManual {
    answer: Option<ManualAnswer>,
}

impl FakeManual {
    fn grounded() -> Arc<dyn Specialist> {
        Arc::new(Self {
            answer: Some(ManualAnswer {
                text: "The input impedance is 1 MΩ.".into(),
                evidence: vec!["Input impedance: 1 MΩ".into()],
                relevance: vec![0.9],
                confidence: 0.85,
                ..ManualAnswer::default()
            }),
        })
    }

    fn no_evidence() -> Arc<dyn Specialist> {
        Arc::new(Self {
            answer: Some(ManualAnswer {
                text: "The input impedance is 500 kΩ.".into(),
                confidence: 0.6,
                ..ManualAnswer::default()
            }),
        })
    }

    fn failing() -> Arc<dyn Specialist> {
        Arc::new(Self { answer: None })
    }
}

#[async_trait]
impl Specialist for FakeManual {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Manual
    }

    async fn answer(&self, _state: &RequestState) -> Result<SpecialistAnswer, CapabilityError> {
        match &self.answer {
            Some(answer) => Ok(SpecialistAnswer::Manual(answer.clone())),
            None => Err(CapabilityError::Transport("manual index offline".into())),
        }
    }
}

struct FakePricing {
    pricing: PricingData,
}

impl FakePricing {
    fn live() -> Arc<dyn Specialist> {
        Arc::new(Self {
            pricing: PricingData::Priced(PricedResult {
                product: "Boss DS-1".into(),
                avg_price: 54.0,
                min_price: 35.0,
                max_price: 80.0,
                median_price: 52.0,
                total_listings: 42,
                source: DataSource::Live,
            }),
        })
    }

    fn unavailable() -> Arc<dyn Specialist> {
        Arc::new(Self {
            pricing: PricingData::Unavailable {
                error: "marketplace returned 503".into(),
            },
        })
    }
}

#[async_trait]
impl Specialist for FakePricing {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Pricing
    }

    async fn answer(&self, _state: &RequestState) -> Result<SpecialistAnswer, CapabilityError> {
        Ok(SpecialistAnswer::Pricing(PricingAnswer {
            text: None,
            pricing: self.pricing.clone(),
        }))
    }
}

struct CountingValidator {
    accurate: bool,
    calls: AtomicUsize,
}

impl CountingValidator {
    fn new(accurate: bool) -> Arc<Self> {
        Arc::new(Self {
            accurate,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for CountingValidator {
    async fn validate(
        &self,
        _answer: &str,
        _evidence: &[String],
    ) -> Result<ValidationVerdict, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.accurate {
            Ok(ValidationVerdict::accurate("matches the manual"))
        } else {
            Ok(ValidationVerdict {
                is_accurate: false,
                hallucination_detected: true,
                confidence: 0.3,
                issues: vec!["impedance value not in sources".into()],
                reasoning: "contradicts source 1".into(),
            })
        }
    }
}

fn engine(
    classifier: Arc<dyn Classifier>,
    manual: Arc<dyn Specialist>,
    pricing: Arc<dyn Specialist>,
    validator: Arc<dyn Validator>,
) -> Orchestrator {
    let registry = SpecialistRegistry::new().with(manual).with(pricing);
    Orchestrator::new(
        RouterAgent::new(classifier, Duration::from_secs(5)),
        Dispatcher::new(registry, Duration::from_secs(5)),
        QualityGate::new(validator, Duration::from_secs(5), GateConfig::default()),
    )
}

fn request(query: &str) -> RequestState {
    RequestState::new("user-1", "conv-1", "Boss DS-1", query)
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn grounded_manual_answer_is_accepted() {
    let validator = CountingValidator::new(true);
    let state = engine(
        FakeClassifier::fixed(Intent::ManualQuestion),
        FakeManual::grounded(),
        FakePricing::live(),
        validator.clone(),
    )
    .run(request("What is the input impedance?"))
    .await;

    assert_eq!(
        state.agent_path,
        vec![
            Stage::Router,
            Stage::ManualAgent,
            Stage::QualityCheck,
            Stage::Synthesizer
        ]
    );
    assert_eq!(state.fallback_reason, FallbackReason::None);
    assert_eq!(
        state.final_answer.as_deref(),
        Some("The input impedance is 1 MΩ.")
    );
    assert!(!state.hallucination_flag);
    assert_eq!(validator.calls(), 1);
}

#[tokio::test]
async fn zero_evidence_rejects_without_calling_validator() {
    let validator = CountingValidator::new(true);
    let state = engine(
        FakeClassifier::fixed(Intent::ManualQuestion),
        FakeManual::no_evidence(),
        FakePricing::live(),
        validator.clone(),
    )
    .run(request("What is the input impedance?"))
    .await;

    assert!(state.hallucination_flag);
    assert!(state.needs_human_review);
    assert_eq!(state.fallback_reason, FallbackReason::RetrievalFailed);
    assert_eq!(validator.calls(), 0);
    assert_eq!(state.agent_path.last(), Some(&Stage::Fallback));
    assert!(!state
        .final_answer
        .as_deref()
        .unwrap_or_default()
        .contains("500 kΩ"));
}

#[tokio::test]
async fn hallucinated_answer_falls_back() {
    let state = engine(
        FakeClassifier::fixed(Intent::ManualQuestion),
        FakeManual::grounded(),
        FakePricing::live(),
        CountingValidator::new(false),
    )
    .run(request("What is the input impedance?"))
    .await;

    assert_eq!(state.fallback_reason, FallbackReason::HallucinationDetected);
    assert!(state.confidence_score < 0.85);
    assert_ne!(state.final_answer, state.raw_answer);
}

#[tokio::test]
async fn hybrid_with_failed_manual_branch_keeps_pricing() {
    let validator = CountingValidator::new(true);
    let state = engine(
        FakeClassifier::fixed(Intent::Hybrid),
        FakeManual::failing(),
        FakePricing::live(),
        validator.clone(),
    )
    .run(request("What effects does it have and how much does it cost?"))
    .await;

    assert!(state.hybrid_partial_success);
    assert!((state.confidence_score - 0.7).abs() < 1e-9);
    assert_eq!(state.fallback_reason, FallbackReason::None);
    assert_eq!(
        state.agent_path,
        vec![
            Stage::Router,
            Stage::HybridAgent,
            Stage::ManualAgentFailed,
            Stage::PricingAgent,
            Stage::QualityCheck,
            Stage::Synthesizer
        ]
    );

    let answer = state.final_answer.unwrap();
    assert!(answer.contains("$54.00"));
    assert!(!answer.contains("manual index offline"));
    assert_eq!(validator.calls(), 0);
}

#[tokio::test]
async fn hybrid_with_both_branches_failing_reports_nothing_found() {
    let state = engine(
        FakeClassifier::fixed(Intent::Hybrid),
        FakeManual::failing(),
        FakePricing::unavailable(),
        CountingValidator::new(true),
    )
    .run(request("What effects does it have and how much does it cost?"))
    .await;

    assert!(!state.hybrid_partial_success);
    assert!((state.confidence_score - 0.2).abs() < 1e-9);
    assert_eq!(state.fallback_reason, FallbackReason::None);
    assert_eq!(state.agent_path.last(), Some(&Stage::Synthesizer));
    assert!(state.error.is_some());
    assert!(state
        .final_answer
        .unwrap()
        .starts_with("I couldn't find complete information"));
}

#[tokio::test]
async fn priced_result_passes_gate_with_floor() {
    let validator = CountingValidator::new(true);
    let state = engine(
        FakeClassifier::fixed(Intent::Pricing),
        FakeManual::grounded(),
        FakePricing::live(),
        validator.clone(),
    )
    .run(request("how much does a used one go for"))
    .await;

    assert_eq!(
        state.agent_path,
        vec![
            Stage::Router,
            Stage::PricingAgent,
            Stage::QualityCheck,
            Stage::Synthesizer
        ]
    );
    assert!(state.confidence_score >= 0.85);
    assert!(state.evidence.is_empty());
    assert_eq!(state.fallback_reason, FallbackReason::None);
    assert_eq!(validator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn classifier_outage_falls_back_to_keywords() {
    let classifier = FakeClassifier::unreachable();
    let state = engine(
        classifier.clone(),
        FakeManual::grounded(),
        FakePricing::live(),
        CountingValidator::new(true),
    )
    .run(request("Where can I buy one and how do I connect it to my amp?"))
    .await;

    assert_eq!(state.intent, Some(Intent::Hybrid));
    assert_eq!(state.agent_path.first(), Some(&Stage::RouterFallback));
    assert_eq!(
        state
            .agent_path
            .iter()
            .filter(|s| s.is_routing())
            .count(),
        1
    );
    let error = state.error.as_ref().unwrap();
    assert_eq!(error.stage, Stage::RouterFallback);
    assert_eq!(error.fallback_reason(), FallbackReason::RouterError);
    assert!(state.hybrid_partial_success);
    assert_eq!(state.retry_count, 2);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_query_produces_retrieval_failed() {
    let classifier = FakeClassifier::fixed(Intent::ManualQuestion);
    let state = engine(
        classifier.clone(),
        FakeManual::grounded(),
        FakePricing::live(),
        CountingValidator::new(true),
    )
    .run(request("   "))
    .await;

    assert_eq!(state.fallback_reason, FallbackReason::RetrievalFailed);
    assert_eq!(
        state.agent_path,
        vec![
            Stage::Router,
            Stage::ManualAgentSkipped,
            Stage::QualityCheckSkipped,
            Stage::Fallback
        ]
    );
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    assert!(state.final_answer.is_some());
}

#[tokio::test]
async fn greeting_is_answered_without_classifier() {
    let classifier = FakeClassifier::fixed(Intent::ManualQuestion);
    let state = engine(
        classifier.clone(),
        FakeManual::grounded(),
        FakePricing::live(),
        CountingValidator::new(true),
    )
    .run(request("hello"))
    .await;

    assert_eq!(state.intent, Some(Intent::Casual));
    assert_eq!(state.agent_path, vec![Stage::Router, Stage::Synthesizer]);
    assert_eq!(state.confidence_score, 1.0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn confidence_stays_in_unit_range() {
    let cases: Vec<(Intent, Arc<dyn Specialist>, Arc<dyn Specialist>, bool)> = vec![
        (Intent::ManualQuestion, FakeManual::grounded(), FakePricing::live(), true),
        (Intent::ManualQuestion, FakeManual::grounded(), FakePricing::live(), false),
        (Intent::ManualQuestion, FakeManual::failing(), FakePricing::live(), true),
        (Intent::Pricing, FakeManual::grounded(), FakePricing::unavailable(), true),
        (Intent::Hybrid, FakeManual::grounded(), FakePricing::live(), true),
        (Intent::Hybrid, FakeManual::failing(), FakePricing::unavailable(), false),
    ];

    for (intent, manual, pricing, accurate) in cases {
        let state = engine(
            FakeClassifier::fixed(intent),
            manual,
            pricing,
            CountingValidator::new(accurate),
        )
        .run(request("What is the input impedance and the price?"))
        .await;
        assert!(
            (0.0..=1.0).contains(&state.confidence_score),
            "{intent}: {}",
            state.confidence_score
        );
        assert!(state.final_answer.is_some(), "{intent}: no final answer");
    }
}

#[tokio::test]
async fn stream_follows_agent_path_and_ends_with_done() {
    let orchestrator = engine(
        FakeClassifier::fixed(Intent::ManualQuestion),
        FakeManual::grounded(),
        FakePricing::live(),
        CountingValidator::new(true),
    );
    let events: Vec<_> = orchestrator
        .run_stream(request("What is the input impedance?"))
        .collect()
        .await;

    let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec!["router", "manual_agent", "quality_check", "synthesizer", "done"]
    );
    let last = events.last().unwrap().state();
    assert_eq!(last.agent_path.len(), 4);
    assert!(last.final_answer.is_some());
}

#[tokio::test]
async fn agent_path_is_deterministic_per_outcome() {
    let run = || async {
        engine(
            FakeClassifier::fixed(Intent::Hybrid),
            FakeManual::grounded(),
            FakePricing::live(),
            CountingValidator::new(true),
        )
        .run(request("What effects does it have and how much does it cost?"))
        .await
        .agent_path
    };

    let first = run().await;
    for _ in 0..5 {
        assert_eq!(run().await, first);
    }
}
