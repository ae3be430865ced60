//! Router stage: normalize the query, then classify its intent.
//!
//! Casual small talk is answered here without a classifier call. Classifier
//! failures never escape: transient ones are retried within the configured
//! budget, after which the keyword heuristic takes over.

use std::sync::Arc;
use std::time::Duration;

use coordination::router::{is_casual, keyword_intent, CASUAL_REPLY, KEYWORD_FALLBACK_CONFIDENCE};
use coordination::{preprocess, Classification, Intent, RequestState, Stage, StageError};
use tracing::{debug, info, warn};

use crate::capabilities::{ClassificationRequest, Classifier};
use crate::errors::CapabilityError;

/// Conversation turns longer than this are cut before being sent as context.
const CONTEXT_TURN_CHARS: usize = 150;

pub struct RouterAgent {
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    context_turns: usize,
}

impl RouterAgent {
    pub fn new(classifier: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self {
            classifier,
            timeout,
            max_retries: 2,
            backoff: Duration::from_millis(250),
            context_turns: 4,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    /// Route a request. Appends exactly one of `router` / `router_fallback`.
    pub async fn route(&self, mut state: RequestState) -> RequestState {
        preprocess(&state.query).apply_to(&mut state);
        debug!(
            normalized = %state.normalized_query,
            typos = state.typos_corrected.len(),
            sub_questions = state.sub_questions.len(),
            "query normalized"
        );

        if is_casual(&state.normalized_query) {
            info!("casual query, answering directly");
            answer_casually(&mut state);
            state.visit(Stage::Router);
            return state;
        }

        if !state.has_query() {
            warn!("empty query after normalization");
            state.intent = Some(Intent::ManualQuestion);
            state.classification_confidence = 0.0;
            state.visit(Stage::Router);
            return state;
        }

        let request = ClassificationRequest {
            query: state.normalized_query.clone(),
            subject: state.subject.clone(),
            context: conversation_context(&state, self.context_turns),
        };

        match self.classify_with_retry(&request, &mut state.retry_count).await {
            Ok(classification) => {
                apply_classification(&mut state, classification);
                state.visit(Stage::Router);
            }
            Err(err) => {
                let intent = keyword_intent(&state.normalized_query);
                warn!(error = %err, fallback_intent = %intent, "classifier failed, using keyword heuristic");
                state.intent = Some(intent);
                state.classification_confidence = KEYWORD_FALLBACK_CONFIDENCE;
                state.set_confidence(KEYWORD_FALLBACK_CONFIDENCE);
                state.classification_rationale = Some("keyword fallback".into());
                state.record_error(StageError::new(
                    Stage::RouterFallback,
                    format!("classification failed: {err}"),
                ));
                state.visit(Stage::RouterFallback);
            }
        }
        state
    }

    async fn classify_with_retry(
        &self,
        request: &ClassificationRequest,
        retry_count: &mut u32,
    ) -> Result<Classification, CapabilityError> {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, self.classifier.classify(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout(self.timeout)),
            };

            match result {
                Ok(classification) => return Ok(classification),
                Err(err) if err.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    *retry_count += 1;
                    let delay = self.backoff * attempt;
                    warn!(
                        attempt,
                        max = self.max_retries,
                        category = %err.retry_category(),
                        error = %err,
                        "classifier call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn answer_casually(state: &mut RequestState) {
    state.intent = Some(Intent::Casual);
    state.classification_confidence = 1.0;
    state.set_confidence(1.0);
    state.raw_answer = Some(CASUAL_REPLY.to_string());
    state.protected_answer = true;
}

fn apply_classification(state: &mut RequestState, classification: Classification) {
    let classification = classification.nudged_for_typos(state.typos_corrected.len());
    info!(
        intent = %classification.intent,
        confidence = classification.confidence,
        "query classified"
    );

    if let Some(subject) = classification.subject.filter(|s| *s != state.subject) {
        debug!(from = %state.subject, to = %subject, "subject corrected by classifier");
        state.subject = subject;
    }
    state.intent = Some(classification.intent);
    state.classification_confidence = classification.confidence;
    state.set_confidence(classification.confidence);
    if !classification.rationale.is_empty() {
        state.classification_rationale = Some(classification.rationale);
    }

    if classification.intent == Intent::Casual {
        answer_casually(state);
    }
}

/// The last `turns` conversation turns, oldest first, each truncated.
pub fn conversation_context(state: &RequestState, turns: usize) -> Vec<String> {
    let history = &state.conversation_history;
    let start = history.len().saturating_sub(turns);
    history[start..]
        .iter()
        .map(|turn| {
            let content = if turn.content.chars().count() > CONTEXT_TURN_CHARS {
                let cut: String = turn.content.chars().take(CONTEXT_TURN_CHARS).collect();
                format!("{cut}...")
            } else {
                turn.content.clone()
            };
            format!("{}: {}", turn.role, content)
        })
        .collect()
}
