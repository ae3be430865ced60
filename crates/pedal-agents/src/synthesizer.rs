//! Terminal stages: copy an accepted answer out, or explain a rejection.

use coordination::{fallback_message, FallbackReason, RequestState, Stage};
use tracing::{info, warn};

/// Accepted path. The candidate answer becomes the final answer unchanged.
pub fn synthesize(mut state: RequestState) -> RequestState {
    state.final_answer = state.raw_answer.clone();
    info!(
        intent = state.intent.map_or("unclassified", |i| i.as_str()),
        confidence = state.confidence_score,
        review = state.needs_human_review,
        "answer accepted"
    );
    state.visit(Stage::Synthesizer);
    state
}

/// Rejected path. Records the reason and replaces the answer with the
/// reason-specific message.
pub fn respond_with_fallback(mut state: RequestState, reason: FallbackReason) -> RequestState {
    if reason.is_none() {
        warn!("fallback requested without a reason");
    }
    state.fallback_reason = reason;
    state.final_answer = Some(fallback_message(&state));
    info!(reason = %reason, "answer rejected, returning fallback message");
    state.visit(Stage::Fallback);
    state
}
