//! Structured telemetry for request runs.
//!
//! Captures per-stage timings, the state machine transition log and the
//! final gate decision for every run. Two sinks:
//! - a `tracing` event (`target: "pedal.metrics"`) per run
//! - an optional append-only JSONL file for offline analysis

use std::path::Path;
use std::time::Instant;

use coordination::{FallbackReason, RequestState, Stage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state_machine::{PipelineState, TransitionRecord};

/// Wall-clock time spent in one pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub state: PipelineState,
    pub elapsed_ms: u64,
}

/// Everything recorded about a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub requester_id: String,
    pub conversation_id: String,
    pub intent: Option<String>,
    pub accepted: bool,
    pub fallback_reason: FallbackReason,
    pub confidence: f64,
    pub hallucination: bool,
    pub needs_review: bool,
    pub hybrid_partial_success: bool,
    pub retry_count: u32,
    pub agent_path: Vec<Stage>,
    pub stage_timings: Vec<StageTiming>,
    pub transitions: Vec<TransitionRecord>,
    /// Recorded stage error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub timestamp: String,
}

impl RunMetrics {
    /// Emit this run as a structured tracing event.
    pub fn emit(&self) {
        info!(
            target: "pedal.metrics",
            conversation = %self.conversation_id,
            intent = self.intent.as_deref().unwrap_or("unclassified"),
            accepted = self.accepted,
            fallback = %self.fallback_reason,
            confidence = self.confidence,
            review = self.needs_review,
            retries = self.retry_count,
            stages = self.agent_path.len(),
            elapsed_ms = self.elapsed_ms,
            "run_complete"
        );
    }

    /// Time spent in `state`, if it was entered.
    pub fn time_in(&self, state: PipelineState) -> Option<u64> {
        self.stage_timings
            .iter()
            .find(|t| t.state == state)
            .map(|t| t.elapsed_ms)
    }
}

/// Builder that accumulates timings while a run is in flight.
///
/// Call `enter()` as the pipeline moves into each state, then
/// `finalize()` once the run is terminal.
pub struct TelemetryCollector {
    run_start: Instant,
    current: Option<(PipelineState, Instant)>,
    timings: Vec<StageTiming>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self {
            run_start: Instant::now(),
            current: None,
            timings: Vec::new(),
        }
    }

    /// Close the timing of the current state and start timing `state`.
    pub fn enter(&mut self, state: PipelineState) {
        self.close_current();
        if !state.is_terminal() {
            self.current = Some((state, Instant::now()));
        }
    }

    fn close_current(&mut self) {
        if let Some((state, started)) = self.current.take() {
            self.timings.push(StageTiming {
                state,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    /// Produce the run metrics from the final state and transition log.
    pub fn finalize(
        mut self,
        state: &RequestState,
        transitions: Vec<TransitionRecord>,
    ) -> RunMetrics {
        self.close_current();
        let run_failed = state
            .error
            .as_ref()
            .is_some_and(|e| e.stage == Stage::Error);
        RunMetrics {
            requester_id: state.requester_id.clone(),
            conversation_id: state.conversation_id.clone(),
            intent: state.intent.map(|i| i.as_str().to_string()),
            accepted: state.fallback_reason.is_none() && !run_failed,
            fallback_reason: state.fallback_reason,
            confidence: state.confidence_score,
            hallucination: state.hallucination_flag,
            needs_review: state.needs_human_review,
            hybrid_partial_success: state.hybrid_partial_success,
            retry_count: state.retry_count,
            agent_path: state.agent_path.clone(),
            stage_timings: self.timings,
            transitions,
            error: state.error.as_ref().map(ToString::to_string),
            elapsed_ms: self.run_start.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Append run metrics to a JSONL file, one run per line.
pub fn append_telemetry(metrics: &RunMetrics, path: &Path) {
    match serde_json::to_string(metrics) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), "Appended run telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
