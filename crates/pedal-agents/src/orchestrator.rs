//! Orchestration: drive one request through route → answer → gate → respond.
//!
//! ```text
//! Received ─▶ Routing ─┬─▶ Answering ───┐
//!                      ├─▶ Dispatching ─┼─▶ Gating ─┬─▶ Synthesizing ─▶ Completed
//!                      │                │           └─▶ FallingBack ──▶ Completed
//!                      └─▶ Synthesizing (casual) ─────────────────────▶ Completed
//! ```
//!
//! The pipeline runs on its own task so a panic in any stage is caught at
//! the `run` boundary and turned into a generic answer. Stage failures
//! before that boundary are recovered locally and never abort the run.

use std::sync::Arc;

use coordination::{
    GateDecision, Intent, RequestState, SpecialistKind, Stage, StageError, GENERIC_ERROR_MESSAGE,
};
use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PedalConfig;
use crate::dispatcher::Dispatcher;
use crate::quality_gate::QualityGate;
use crate::router::RouterAgent;
use crate::state_machine::{IllegalTransition, PipelineState, StateMachine};
use crate::synthesizer::{respond_with_fallback, synthesize};
use crate::telemetry::{RunMetrics, TelemetryCollector};

/// Buffered stage events per streaming run.
const STREAM_BUFFER: usize = 32;

/// One event of a streaming run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    /// A stage finished; `state` is the state as it left that stage.
    Stage { stage: Stage, state: Box<RequestState> },
    /// The run completed; `state` is final.
    Done { state: Box<RequestState> },
    /// The run failed internally; `state` carries the generic answer.
    Error {
        message: String,
        state: Box<RequestState>,
    },
}

impl StageEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Stage { stage, .. } => stage.as_str(),
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn state(&self) -> &RequestState {
        match self {
            Self::Stage { state, .. } | Self::Done { state } | Self::Error { state, .. } => state,
        }
    }
}

/// Stage components shared by every run.
struct Pipeline {
    router: RouterAgent,
    dispatcher: Dispatcher,
    gate: QualityGate,
}

/// Per-run bookkeeping: transition guard, timings, the event sink and the
/// last settled state.
struct RunContext {
    machine: StateMachine,
    telemetry: TelemetryCollector,
    events: Option<mpsc::Sender<StageEvent>>,
    emitted: usize,
    cancel: CancellationToken,
    checkpoint: watch::Sender<RequestState>,
}

impl RunContext {
    fn new(
        events: Option<mpsc::Sender<StageEvent>>,
        cancel: CancellationToken,
        checkpoint: watch::Sender<RequestState>,
    ) -> Self {
        Self {
            machine: StateMachine::new(),
            telemetry: TelemetryCollector::new(),
            events,
            emitted: 0,
            cancel,
            checkpoint,
        }
    }

    fn advance(&mut self, to: PipelineState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        self.machine.advance(to, reason)?;
        self.telemetry.enter(to);
        Ok(())
    }

    /// Checkpoint the state, then send one event per stage appended since
    /// the last call.
    async fn emit_new_stages(&mut self, state: &RequestState) {
        self.checkpoint.send_replace(state.clone());
        let Some(events) = &self.events else {
            self.emitted = state.agent_path.len();
            return;
        };
        while self.emitted < state.agent_path.len() {
            let stage = state.agent_path[self.emitted];
            self.emitted += 1;
            let event = StageEvent::Stage {
                stage,
                state: Box::new(state.clone()),
            };
            if events.send(event).await.is_err() {
                debug!("stream consumer gone, cancelling run");
                self.cancel.cancel();
                self.events = None;
                self.emitted = state.agent_path.len();
                return;
            }
        }
    }
}

/// Outcome of the pipeline task.
struct DriveOutcome {
    result: Result<RequestState, IllegalTransition>,
    machine: StateMachine,
    telemetry: TelemetryCollector,
}

impl Pipeline {
    async fn drive(&self, state: RequestState, ctx: &mut RunContext) -> Result<RequestState, IllegalTransition> {
        ctx.advance(PipelineState::Routing, None)?;
        let state = self.router.route(state).await;
        ctx.emit_new_stages(&state).await;

        let intent = state.intent.unwrap_or(Intent::ManualQuestion);
        let state = match intent {
            Intent::Casual => {
                ctx.advance(PipelineState::Synthesizing, Some("casual"))?;
                let state = synthesize(state);
                ctx.emit_new_stages(&state).await;
                ctx.advance(PipelineState::Completed, None)?;
                return Ok(state);
            }
            Intent::ManualQuestion | Intent::Explanation => {
                ctx.advance(PipelineState::Answering, Some(intent.as_str()))?;
                if state.has_query() {
                    self.dispatcher
                        .answer(SpecialistKind::Manual, state, &ctx.cancel)
                        .await
                } else {
                    let mut state = state;
                    warn!("empty query, manual specialist skipped");
                    state.visit(Stage::ManualAgentSkipped);
                    state
                }
            }
            Intent::Pricing => {
                ctx.advance(PipelineState::Answering, Some(intent.as_str()))?;
                self.dispatcher
                    .answer(SpecialistKind::Pricing, state, &ctx.cancel)
                    .await
            }
            Intent::Hybrid => {
                ctx.advance(PipelineState::Dispatching, Some(intent.as_str()))?;
                self.dispatcher.dispatch_hybrid(state, &ctx.cancel).await
            }
        };
        ctx.emit_new_stages(&state).await;

        ctx.advance(PipelineState::Gating, None)?;
        let state = self.gate.validate(state).await;
        ctx.emit_new_stages(&state).await;

        let state = match self.gate.decide(&state) {
            GateDecision::Accept => {
                ctx.advance(PipelineState::Synthesizing, Some("accept"))?;
                synthesize(state)
            }
            GateDecision::Reject(reason) => {
                ctx.advance(PipelineState::FallingBack, Some(reason.as_str()))?;
                respond_with_fallback(state, reason)
            }
        };
        ctx.emit_new_stages(&state).await;
        ctx.advance(PipelineState::Completed, None)?;
        Ok(state)
    }
}

/// The request orchestration engine.
///
/// Cheap to clone; clones share the same stage components.
#[derive(Clone)]
pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
}

impl Orchestrator {
    pub fn new(router: RouterAgent, dispatcher: Dispatcher, gate: QualityGate) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                router,
                dispatcher,
                gate,
            }),
        }
    }

    /// Build the engine from configuration and capability implementations.
    pub fn from_config(
        config: &PedalConfig,
        classifier: Arc<dyn crate::capabilities::Classifier>,
        specialists: crate::capabilities::SpecialistRegistry,
        validator: Arc<dyn crate::capabilities::Validator>,
    ) -> Self {
        let router = RouterAgent::new(classifier, config.timeouts.classify())
            .with_retries(config.classification_retries, config.retry_backoff())
            .with_context_turns(config.context_turns);
        let dispatcher = Dispatcher::new(specialists, config.timeouts.specialist())
            .with_fanout_timeout(config.timeouts.fanout())
            .with_low_trust_penalty(config.gate.low_trust_penalty);
        let gate = QualityGate::new(validator, config.timeouts.validate(), config.gate.clone());
        Self::new(router, dispatcher, gate)
    }

    /// Run a request to completion. Never panics and never returns an error:
    /// internal failures come back as a state carrying a generic answer and
    /// the recorded error.
    pub async fn run(&self, state: RequestState) -> RequestState {
        self.run_with_telemetry(state, CancellationToken::new())
            .await
            .0
    }

    /// Run a request and return its telemetry alongside the final state.
    pub async fn run_with_telemetry(
        &self,
        state: RequestState,
        cancel: CancellationToken,
    ) -> (RequestState, RunMetrics) {
        let (state, metrics, _) = self.execute(state, cancel, None).await;
        (state, metrics)
    }

    /// Run a request, yielding one event per stage in `agent_path` order,
    /// then `done` (or `error` if the run failed internally).
    ///
    /// Dropping the stream cancels the run.
    pub fn run_stream(&self, state: RequestState) -> impl Stream<Item = StageEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let engine = self.clone();
        tokio::spawn(async move {
            let (state, _, failed) = engine
                .execute(state, CancellationToken::new(), Some(tx.clone()))
                .await;
            let last = if failed {
                StageEvent::Error {
                    message: GENERIC_ERROR_MESSAGE.to_string(),
                    state: Box::new(state),
                }
            } else {
                StageEvent::Done {
                    state: Box::new(state),
                }
            };
            // A closed channel only means the consumer went away.
            let _ = tx.send(last).await;
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    async fn execute(
        &self,
        state: RequestState,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<StageEvent>>,
    ) -> (RequestState, RunMetrics, bool) {
        info!(
            conversation = %state.conversation_id,
            subject = %state.subject,
            "request received"
        );
        let (checkpoint, last_settled) = watch::channel(state.clone());
        let pipeline = self.pipeline.clone();

        let handle = tokio::spawn(async move {
            let mut ctx = RunContext::new(events, cancel, checkpoint);
            let result = pipeline.drive(state, &mut ctx).await;
            DriveOutcome {
                result,
                machine: ctx.machine,
                telemetry: ctx.telemetry,
            }
        });

        match handle.await {
            Ok(DriveOutcome {
                result: Ok(state),
                mut machine,
                telemetry,
            }) => {
                let metrics = telemetry.finalize(&state, machine.take_transitions());
                info!(summary = %state.summary(), "request complete");
                metrics.emit();
                (state, metrics, false)
            }
            Ok(DriveOutcome {
                result: Err(illegal),
                mut machine,
                telemetry,
            }) => {
                error!(error = %illegal, "pipeline left its transition graph");
                if let Err(e) = machine.fail(&illegal.to_string()) {
                    debug!(error = %e, "state machine already terminal");
                }
                let state = failed_state(last_settled.borrow().clone(), &illegal.to_string());
                let metrics = telemetry.finalize(&state, machine.take_transitions());
                metrics.emit();
                (state, metrics, true)
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "pipeline panicked"
                } else {
                    "pipeline task aborted"
                };
                error!(error = %join_error, "{message}");
                let mut machine = StateMachine::new();
                if let Err(e) = machine.fail(message) {
                    debug!(error = %e, "state machine already terminal");
                }
                let state = failed_state(last_settled.borrow().clone(), message);
                let metrics = TelemetryCollector::new().finalize(&state, machine.take_transitions());
                metrics.emit();
                (state, metrics, true)
            }
        }
    }
}

/// Best-effort response for a run that failed internally, built on the
/// last state a stage handed back so the path so far is kept.
fn failed_state(mut state: RequestState, message: &str) -> RequestState {
    state.record_error(StageError::critical(Stage::Error, message));
    state.final_answer = Some(GENERIC_ERROR_MESSAGE.to_string());
    state.set_confidence(0.0);
    state.needs_human_review = true;
    state.visit(Stage::Error);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        ClassificationRequest, Classifier, ManualAnswer, Specialist, SpecialistAnswer,
        SpecialistRegistry, Validator,
    };
    use crate::errors::CapabilityError;
    use async_trait::async_trait;
    use coordination::{Classification, FallbackReason, ValidationVerdict};
    use futures::StreamExt;
    use std::time::Duration;

    struct FixedClassifier(Intent);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(
            &self,
            _request: &ClassificationRequest,
        ) -> Result<Classification, CapabilityError> {
            Ok(Classification {
                intent: self.0,
                subject: None,
                confidence: 0.9,
                rationale: "fixed".into(),
            })
        }
    }

    struct ManualSpecialist {
        panic: bool,
    }

    #[async_trait]
    impl Specialist for ManualSpecialist {
        fn kind(&self) -> SpecialistKind {
            SpecialistKind::Manual
        }

        async fn answer(&self, _state: &RequestState) -> Result<SpecialistAnswer, CapabilityError> {
            if self.panic {
                panic!("index corrupted");
            }
            Ok(SpecialistAnswer::Manual(ManualAnswer {
                text: "Press and hold the TAP switch for two seconds.".into(),
                evidence: vec!["Hold TAP for 2 seconds to enter tempo mode.".into()],
                relevance: vec![0.88],
                confidence: 0.82,
                ..ManualAnswer::default()
            }))
        }
    }

    struct AcceptingValidator;

    #[async_trait]
    impl Validator for AcceptingValidator {
        async fn validate(
            &self,
            _answer: &str,
            _evidence: &[String],
        ) -> Result<ValidationVerdict, CapabilityError> {
            Ok(ValidationVerdict::accurate("supported by the manual"))
        }
    }

    struct PanickingValidator;

    #[async_trait]
    impl Validator for PanickingValidator {
        async fn validate(
            &self,
            _answer: &str,
            _evidence: &[String],
        ) -> Result<ValidationVerdict, CapabilityError> {
            panic!("validator bug")
        }
    }

    fn engine(intent: Intent, validator: Arc<dyn Validator>, panic: bool) -> Orchestrator {
        let registry = SpecialistRegistry::new().with(Arc::new(ManualSpecialist { panic }));
        Orchestrator::new(
            RouterAgent::new(Arc::new(FixedClassifier(intent)), Duration::from_secs(5)),
            Dispatcher::new(registry, Duration::from_secs(5)),
            QualityGate::new(validator, Duration::from_secs(5), Default::default()),
        )
    }

    fn request() -> RequestState {
        RequestState::new("u1", "c1", "Boss DD-8", "How do I enter tap tempo mode?")
    }

    #[tokio::test]
    async fn manual_success_path() {
        let (state, metrics) = engine(Intent::ManualQuestion, Arc::new(AcceptingValidator), false)
            .run_with_telemetry(request(), CancellationToken::new())
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
        assert_eq!(state.final_answer, state.raw_answer);
        assert!(metrics.accepted);
        assert_eq!(metrics.transitions.len(), 5);
        assert_eq!(
            metrics.transitions.last().map(|t| t.to),
            Some(PipelineState::Completed)
        );
    }

    #[tokio::test]
    async fn specialist_panic_is_recovered_locally() {
        let state = engine(Intent::ManualQuestion, Arc::new(AcceptingValidator), true)
            .run(request())
            .await;

        assert_eq!(
            state.agent_path,
            vec![
                Stage::Router,
                Stage::ManualAgentFailed,
                Stage::QualityCheckSkipped,
                Stage::Fallback
            ]
        );
        assert_eq!(state.fallback_reason, FallbackReason::RetrievalFailed);
        assert!(!state.final_answer.unwrap().contains("index corrupted"));
    }

    #[tokio::test]
    async fn panic_in_gate_is_caught_at_run_boundary() {
        let state = engine(Intent::ManualQuestion, Arc::new(PanickingValidator), false)
            .run(request())
            .await;

        assert_eq!(state.final_answer.as_deref(), Some(GENERIC_ERROR_MESSAGE));
        assert_eq!(
            state.agent_path,
            vec![Stage::Router, Stage::ManualAgent, Stage::Error]
        );
        assert!(state.intent.is_some());
        assert_eq!(state.confidence_score, 0.0);
        let error = state.error.unwrap();
        assert_eq!(error.stage, Stage::Error);
        assert!(error.critical);
        assert!(state.fallback_reason.is_none());
    }

    #[tokio::test]
    async fn casual_skips_specialists_and_gate() {
        let state = engine(Intent::ManualQuestion, Arc::new(AcceptingValidator), false)
            .run(RequestState::new("u1", "c1", "Boss DD-8", "hey there"))
            .await;

        assert_eq!(state.agent_path, vec![Stage::Router, Stage::Synthesizer]);
        assert_eq!(state.confidence_score, 1.0);
    }

    #[tokio::test]
    async fn stream_follows_agent_path_then_done() {
        let events: Vec<StageEvent> =
            engine(Intent::ManualQuestion, Arc::new(AcceptingValidator), false)
                .run_stream(request())
                .collect()
                .await;

        let names: Vec<&str> = events.iter().map(StageEvent::name).collect();
        assert_eq!(
            names,
            vec!["router", "manual_agent", "quality_check", "synthesizer", "done"]
        );
        assert_eq!(events[1].state().agent_path.len(), 2);
        assert!(events[4].state().final_answer.is_some());
    }

    #[tokio::test]
    async fn stream_reports_internal_failure_as_error_event() {
        let events: Vec<StageEvent> =
            engine(Intent::ManualQuestion, Arc::new(PanickingValidator), false)
                .run_stream(request())
                .collect()
                .await;

        let names: Vec<&str> = events.iter().map(StageEvent::name).collect();
        assert_eq!(names, vec!["router", "manual_agent", "error"]);

        let last = events.last().unwrap();
        assert_eq!(
            last.state().final_answer.as_deref(),
            Some(GENERIC_ERROR_MESSAGE)
        );
        assert_eq!(
            last.state().agent_path,
            vec![Stage::Router, Stage::ManualAgent, Stage::Error]
        );
    }
}
