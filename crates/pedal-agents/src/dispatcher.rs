//! Specialist dispatch: single-specialist calls and the hybrid fan-out.
//!
//! ```text
//! single:  spawn(specialist) ── timeout ──▶ fold into state
//! hybrid:  JoinSet::spawn(branch_i) × N on cloned state
//!          join_next until all settle or the fan-out deadline passes
//!          merge texts, grade degradation, fold into state
//! ```
//!
//! A branch that errors, panics or times out is only a branch failure. The
//! canonical state is touched once, after every branch has settled.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coordination::merge::reports_manual_unavailable;
use coordination::{
    merge_hybrid, BranchReport, HybridAssessment, HybridParts, PartialAnswer, PricingData,
    RequestState, SpecialistKind, Stage, StageError,
};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capabilities::{
    ManualAnswer, PricingAnswer, Specialist, SpecialistAnswer, SpecialistRegistry,
};
use crate::errors::CapabilityError;

/// Confidence of a validly priced answer before trust adjustment.
const PRICED_CONFIDENCE: f64 = 0.9;

const PRICING_UNAVAILABLE_TEXT: &str = "I couldn't fetch pricing data at this time.";

/// Settled result of one specialist call.
#[derive(Debug)]
struct BranchOutcome {
    kind: SpecialistKind,
    result: Result<SpecialistAnswer, CapabilityError>,
    elapsed: Duration,
}

pub struct Dispatcher {
    registry: SpecialistRegistry,
    branch_timeout: Duration,
    fanout_timeout: Duration,
    low_trust_penalty: f64,
}

impl Dispatcher {
    pub fn new(registry: SpecialistRegistry, branch_timeout: Duration) -> Self {
        Self {
            registry,
            branch_timeout,
            fanout_timeout: branch_timeout + Duration::from_secs(5),
            low_trust_penalty: 0.85,
        }
    }

    pub fn with_fanout_timeout(mut self, timeout: Duration) -> Self {
        self.fanout_timeout = timeout;
        self
    }

    pub fn with_low_trust_penalty(mut self, penalty: f64) -> Self {
        self.low_trust_penalty = penalty;
        self
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    // ── Single specialist ────────────────────────────────────────────────

    /// Run one specialist and fold its answer into the state.
    pub async fn answer(
        &self,
        kind: SpecialistKind,
        mut state: RequestState,
        cancel: &CancellationToken,
    ) -> RequestState {
        let Some(specialist) = self.registry.get(kind) else {
            warn!(specialist = %kind, "no specialist registered");
            record_failure(
                &mut state,
                kind,
                &CapabilityError::Configuration(format!("no {kind} specialist registered")),
            );
            return state;
        };

        let snapshot = state.clone();
        let timeout = self.branch_timeout;
        let handle = tokio::spawn(async move { run_branch(specialist, snapshot, timeout).await });
        let abort = handle.abort_handle();

        let outcome = tokio::select! {
            joined = handle => match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(specialist = %kind, error = %e, "specialist task panicked");
                    BranchOutcome {
                        kind,
                        result: Err(CapabilityError::Panicked(e.to_string())),
                        elapsed: Duration::ZERO,
                    }
                }
            },
            _ = cancel.cancelled() => {
                abort.abort();
                warn!(specialist = %kind, "request cancelled during specialist call");
                BranchOutcome { kind, result: Err(CapabilityError::Cancelled), elapsed: Duration::ZERO }
            }
        };

        debug!(specialist = %kind, elapsed_ms = outcome.elapsed.as_millis() as u64, "specialist settled");
        match outcome.result {
            Ok(SpecialistAnswer::Manual(answer)) => apply_manual(&mut state, answer),
            Ok(SpecialistAnswer::Pricing(answer)) => {
                apply_pricing(&mut state, answer, self.low_trust_penalty)
            }
            Err(err) => record_failure(&mut state, kind, &err),
        }
        state
    }

    // ── Hybrid fan-out ───────────────────────────────────────────────────

    /// Run every registered specialist concurrently and merge the results.
    pub async fn dispatch_hybrid(
        &self,
        mut state: RequestState,
        cancel: &CancellationToken,
    ) -> RequestState {
        state.visit(Stage::HybridAgent);
        let kinds = self.registry.kinds();
        info!(branches = kinds.len(), "hybrid fan-out");

        let mut join_set: JoinSet<BranchOutcome> = JoinSet::new();
        let mut branch_tasks: HashMap<task::Id, SpecialistKind> = HashMap::new();
        for specialist in self.registry.all() {
            let kind = specialist.kind();
            let snapshot = state.clone();
            let timeout = self.branch_timeout;
            let handle =
                join_set.spawn(async move { run_branch(specialist, snapshot, timeout).await });
            branch_tasks.insert(handle.id(), kind);
        }

        let mut settled: BTreeMap<SpecialistKind, BranchOutcome> = BTreeMap::new();
        let deadline = tokio::time::Instant::now() + self.fanout_timeout;
        let mut cancelled = false;
        let mut timed_out = false;

        loop {
            tokio::select! {
                next = tokio::time::timeout_at(deadline, join_set.join_next()) => match next {
                    Ok(Some(Ok(outcome))) => {
                        debug!(
                            specialist = %outcome.kind,
                            ok = outcome.result.is_ok(),
                            elapsed_ms = outcome.elapsed.as_millis() as u64,
                            "branch settled"
                        );
                        settled.insert(outcome.kind, outcome);
                    }
                    Ok(Some(Err(e))) => match branch_tasks.get(&e.id()) {
                        Some(&kind) => {
                            warn!(specialist = %kind, error = %e, "hybrid branch panicked");
                            settled.insert(kind, BranchOutcome {
                                kind,
                                result: Err(CapabilityError::Panicked(e.to_string())),
                                elapsed: Duration::ZERO,
                            });
                        }
                        None => warn!(error = %e, "unknown hybrid task failed"),
                    },
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            timeout_ms = self.fanout_timeout.as_millis() as u64,
                            pending = join_set.len(),
                            "fan-out deadline passed, abandoning pending branches"
                        );
                        join_set.abort_all();
                        timed_out = true;
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    warn!(pending = join_set.len(), "request cancelled, aborting hybrid branches");
                    join_set.abort_all();
                    cancelled = true;
                    break;
                }
            }
        }

        let outcomes = kinds
            .into_iter()
            .map(|kind| {
                settled.remove(&kind).unwrap_or_else(|| BranchOutcome {
                    kind,
                    result: Err(if cancelled {
                        CapabilityError::Cancelled
                    } else if timed_out {
                        CapabilityError::Timeout(self.fanout_timeout)
                    } else {
                        CapabilityError::Panicked("branch task did not complete".into())
                    }),
                    elapsed: self.fanout_timeout,
                })
            })
            .collect::<Vec<_>>();

        self.merge_outcomes(&mut state, outcomes);
        if cancelled {
            state.record_error(StageError::critical(
                Stage::HybridAgent,
                "request cancelled during hybrid dispatch",
            ));
        }
        state
    }

    fn merge_outcomes(&self, state: &mut RequestState, outcomes: Vec<BranchOutcome>) {
        let mut reports = Vec::with_capacity(outcomes.len());
        let mut manual_text: Option<String> = None;
        let mut pricing_text: Option<String> = None;

        for outcome in outcomes {
            let kind = outcome.kind;
            match outcome.result {
                Ok(answer) => {
                    let usable = answer.is_usable();
                    let text = answer.text().map(str::to_string);
                    reports.push(BranchReport {
                        specialist: kind,
                        usable,
                        low_trust: answer.is_low_trust(),
                        failure: None,
                    });
                    state.partial_answers.push(PartialAnswer {
                        specialist: kind,
                        text: text.clone(),
                        succeeded: usable,
                    });

                    match answer {
                        SpecialistAnswer::Manual(manual) => {
                            state.subject_undocumented = manual.subject_undocumented;
                            state.protected_answer |= manual.protected && usable;
                            if usable {
                                state.set_evidence(manual.evidence, manual.relevance);
                            }
                            manual_text =
                                text.filter(|t| usable || reports_manual_unavailable(t));
                        }
                        SpecialistAnswer::Pricing(pricing) => {
                            if let PricingData::Unavailable { error } = &pricing.pricing {
                                state.record_error(StageError::new(
                                    kind.failed_stage(),
                                    format!("pricing unavailable: {error}"),
                                ));
                            }
                            state.pricing = Some(pricing.pricing);
                            pricing_text = text.filter(|_| usable);
                        }
                    }

                    if usable {
                        state.visit(kind.stage());
                    } else {
                        debug!(specialist = %kind, "branch returned no usable data");
                        state.visit(kind.failed_stage());
                    }
                }
                Err(err) => {
                    warn!(specialist = %kind, error = %err, "hybrid branch failed");
                    reports.push(BranchReport {
                        specialist: kind,
                        usable: false,
                        low_trust: false,
                        failure: Some(err.to_string()),
                    });
                    state.partial_answers.push(PartialAnswer {
                        specialist: kind,
                        text: None,
                        succeeded: false,
                    });
                    if kind == SpecialistKind::Pricing {
                        state.pricing = Some(PricingData::Unavailable {
                            error: err.to_string(),
                        });
                    }
                    state.record_error(StageError::new(
                        kind.failed_stage(),
                        format!("{kind} branch failed: {err}"),
                    ));
                    state.visit(kind.failed_stage());
                }
            }
        }

        let assessment = HybridAssessment::assess(&reports, self.low_trust_penalty);
        let subject = state.subject.clone();
        let merged = merge_hybrid(&HybridParts {
            subject: &subject,
            manual_text: manual_text.as_deref(),
            pricing_text: pricing_text.as_deref(),
            pricing: state.pricing.as_ref(),
        });

        state.raw_answer = Some(merged);
        state.hybrid_partial_success = assessment.partial_success();
        state.set_confidence(assessment.confidence);

        info!(
            level = %assessment.level,
            succeeded = assessment.succeeded,
            total = assessment.total,
            low_trust = assessment.low_trust,
            confidence = state.confidence_score,
            "hybrid fan-out merged"
        );
    }
}

async fn run_branch(
    specialist: Arc<dyn Specialist>,
    snapshot: RequestState,
    timeout: Duration,
) -> BranchOutcome {
    let kind = specialist.kind();
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, specialist.answer(&snapshot)).await {
        Ok(Ok(answer)) if answer.kind() != kind => Err(CapabilityError::UnexpectedAnswer(format!(
            "{kind} specialist returned a {} answer",
            answer.kind()
        ))),
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout(timeout)),
    };
    BranchOutcome {
        kind,
        result,
        elapsed: start.elapsed(),
    }
}

fn apply_manual(state: &mut RequestState, answer: ManualAnswer) {
    let has_text = !answer.text.trim().is_empty();
    state.set_evidence(answer.evidence, answer.relevance);
    state.set_confidence(answer.confidence);
    state.protected_answer = answer.protected;
    state.subject_undocumented = answer.subject_undocumented;
    state.raw_answer = has_text.then_some(answer.text);
    info!(
        evidence = state.evidence.len(),
        confidence = state.confidence_score,
        protected = state.protected_answer,
        "manual specialist answered"
    );
    state.visit(Stage::ManualAgent);
}

fn apply_pricing(state: &mut RequestState, answer: PricingAnswer, low_trust_penalty: f64) {
    let text = answer.text.filter(|t| !t.trim().is_empty());
    match &answer.pricing {
        PricingData::Priced(result) => {
            let mut confidence = PRICED_CONFIDENCE;
            if result.source.is_low_trust() {
                confidence *= low_trust_penalty;
            }
            state.raw_answer = Some(text.unwrap_or_else(|| result.summary()));
            state.set_confidence(confidence);
            info!(
                listings = result.total_listings,
                low_trust = result.source.is_low_trust(),
                "pricing specialist answered"
            );
            state.pricing = Some(answer.pricing);
            state.visit(Stage::PricingAgent);
        }
        PricingData::Unavailable { error } => {
            warn!(error = %error, "pricing data unavailable");
            state.record_error(StageError::new(
                Stage::PricingAgentFailed,
                format!("pricing unavailable: {error}"),
            ));
            state.raw_answer = Some(text.unwrap_or_else(|| PRICING_UNAVAILABLE_TEXT.to_string()));
            state.set_confidence(0.0);
            state.pricing = Some(answer.pricing);
            state.visit(Stage::PricingAgentFailed);
        }
    }
}

fn record_failure(state: &mut RequestState, kind: SpecialistKind, err: &CapabilityError) {
    warn!(specialist = %kind, error = %err, category = %err.retry_category(), "specialist failed");
    if kind == SpecialistKind::Pricing {
        state.pricing = Some(PricingData::Unavailable {
            error: err.to_string(),
        });
    }
    state.raw_answer = None;
    state.set_confidence(0.0);
    state.record_error(StageError::new(
        kind.failed_stage(),
        format!("{kind} specialist failed: {err}"),
    ));
    state.visit(kind.failed_stage());
}
