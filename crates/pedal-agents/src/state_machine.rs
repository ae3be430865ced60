//! Pipeline states and the transition guard the orchestrator drives.
//!
//! ```text
//! received ─▶ routing ─┬─▶ answering ───┐
//!                      ├─▶ dispatching ─┼─▶ gating ─┬─▶ synthesizing ─▶ completed
//!                      │                │           └─▶ falling_back ──▶ completed
//!                      └─▶ synthesizing (casual)
//! ```
//!
//! Any live state may move to `failed`. Each accepted move is kept as a
//! [`TransitionRecord`] for run telemetry.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    /// Normalizing and classifying the query
    Routing,
    /// One specialist answering
    Answering,
    /// Hybrid fan-out
    Dispatching,
    Gating,
    Synthesizing,
    FallingBack,
    Completed,
    /// Aborted by an internal failure
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Routing => "routing",
            Self::Answering => "answering",
            Self::Dispatching => "dispatching",
            Self::Gating => "gating",
            Self::Synthesizing => "synthesizing",
            Self::FallingBack => "falling_back",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// States reachable from `self` in one step, not counting `Failed`.
    fn successors(self) -> &'static [PipelineState] {
        use PipelineState::*;
        match self {
            Received => &[Routing],
            Routing => &[Answering, Dispatching, Synthesizing],
            Answering | Dispatching => &[Gating],
            Gating => &[Synthesizing, FallingBack],
            Synthesizing | FallingBack => &[Completed],
            Completed | Failed => &[],
        }
    }

    fn can_move_to(self, to: PipelineState) -> bool {
        if to == PipelineState::Failed {
            return !self.is_terminal();
        }
        self.successors().contains(&to)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub to: PipelineState,
    /// Since the machine was created
    pub elapsed_ms: u64,
    /// Intent, gate reason or failure message that drove the move
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Error)]
#[error("pipeline cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

/// Current pipeline state plus the log of how it got there.
pub struct StateMachine {
    current: PipelineState,
    started: Instant,
    log: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Received,
            started: Instant::now(),
            log: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Move to `to`, or refuse if the graph has no such edge.
    pub fn advance(
        &mut self,
        to: PipelineState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        let from = self.current;
        if !from.can_move_to(to) {
            return Err(IllegalTransition { from, to });
        }
        tracing::debug!(%from, %to, reason, "pipeline transition");
        self.log.push(TransitionRecord {
            from,
            to,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            reason: reason.map(str::to_owned),
        });
        self.current = to;
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn log(&self) -> &[TransitionRecord] {
        &self.log
    }

    /// Hand the log to telemetry.
    pub fn take_transitions(&mut self) -> Vec<TransitionRecord> {
        std::mem::take(&mut self.log)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
