use std::time::Duration;

use async_trait::async_trait;
use coordination::{ConversationTurn, RequestState, SpecialistKind};
use serde::Serialize;
use tracing::debug;

use crate::capabilities::{ManualAnswer, PricingAnswer, Specialist, SpecialistAnswer};
use crate::errors::CapabilityError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Body posted to a specialist service.
#[derive(Debug, Serialize)]
struct SpecialistRequest<'a> {
    requester_id: &'a str,
    conversation_id: &'a str,
    subject: &'a str,
    query: &'a str,
    normalized_query: &'a str,
    sub_questions: &'a [String],
    conversation_history: &'a [ConversationTurn],
}

impl<'a> From<&'a RequestState> for SpecialistRequest<'a> {
    fn from(state: &'a RequestState) -> Self {
        Self {
            requester_id: &state.requester_id,
            conversation_id: &state.conversation_id,
            subject: &state.subject,
            query: &state.query,
            normalized_query: &state.normalized_query,
            sub_questions: &state.sub_questions,
            conversation_history: &state.conversation_history,
        }
    }
}

/// A specialist reached over HTTP: `POST {url}` with the request as JSON,
/// answer as JSON (`ManualAnswer` or `PricingAnswer` by kind).
pub struct HttpSpecialist {
    kind: SpecialistKind,
    url: String,
    http: reqwest::Client,
}

impl HttpSpecialist {
    pub fn new(kind: SpecialistKind, url: impl Into<String>) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CapabilityError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            kind,
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Specialist for HttpSpecialist {
    fn kind(&self) -> SpecialistKind {
        self.kind
    }

    async fn answer(&self, state: &RequestState) -> Result<SpecialistAnswer, CapabilityError> {
        let response = self
            .http
            .post(&self.url)
            .json(&SpecialistRequest::from(state))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::status(status, body));
        }

        let answer = match self.kind {
            SpecialistKind::Manual => SpecialistAnswer::Manual(response.json::<ManualAnswer>().await?),
            SpecialistKind::Pricing => {
                SpecialistAnswer::Pricing(response.json::<PricingAnswer>().await?)
            }
        };
        debug!(specialist = %self.kind, usable = answer.is_usable(), "specialist responded");
        Ok(answer)
    }
}
