//! Quality gate stage: decide the validation path, make the validator call
//! when one is needed, then fold the outcome into the state.

use std::sync::Arc;
use std::time::Duration;

use coordination::quality::gate::{apply_validator_error, apply_verdict, prepare, settle};
use coordination::{
    plan_validation, should_reject, GateConfig, GateDecision, RequestState, ValidationPlan,
};
use tracing::{info, warn};

use crate::capabilities::Validator;
use crate::errors::CapabilityError;

pub struct QualityGate {
    validator: Arc<dyn Validator>,
    timeout: Duration,
    config: GateConfig,
}

impl QualityGate {
    pub fn new(validator: Arc<dyn Validator>, timeout: Duration, config: GateConfig) -> Self {
        Self {
            validator,
            timeout,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Validate the candidate answer. Appends exactly one quality stage.
    ///
    /// Running this twice on the same state gives the same flags and
    /// confidence.
    pub async fn validate(&self, mut state: RequestState) -> RequestState {
        prepare(&mut state);
        let plan = plan_validation(&state, &self.config);

        match plan {
            ValidationPlan::Validate {
                scope,
                answer,
                evidence,
                report,
            } => {
                let call = self.validator.validate(&answer, &evidence);
                let result = match tokio::time::timeout(self.timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(CapabilityError::Timeout(self.timeout)),
                };
                match result {
                    Ok(verdict) => apply_verdict(&mut state, scope, &verdict, &report),
                    Err(err) => {
                        warn!(category = %err.retry_category(), "validator unavailable");
                        apply_validator_error(&mut state, scope, &err.to_string(), &report);
                    }
                }
            }
            other => settle(&mut state, &other, &self.config),
        }
        state
    }

    /// Accept or reject the validated state.
    pub fn decide(&self, state: &RequestState) -> GateDecision {
        let decision = should_reject(state, &self.config);
        info!(
            decision = %decision,
            confidence = state.confidence_score,
            hallucination = state.hallucination_flag,
            "gate decision"
        );
        decision
    }
}
