use std::time::{Duration, Instant};

use async_trait::async_trait;
use coordination::quality::parse_verdict;
use coordination::{parse_classification, Classification, ValidationVerdict};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::{ClassificationRequest, Classifier, Validator};
use crate::config::LlmConfig;
use crate::errors::CapabilityError;
use crate::prompts::{
    classifier_message, validator_message, CLASSIFIER_PREAMBLE, PROMPT_VERSION, VALIDATOR_PREAMBLE,
};

/// Upper bound for a single HTTP exchange; stage timeouts are usually tighter.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// First non-empty completion text in a chat response.
fn completion_text(response: ChatResponse) -> Result<String, CapabilityError> {
    response
        .choices
        .into_iter()
        .filter_map(|c| c.message.content)
        .find(|c| !c.trim().is_empty())
        .ok_or_else(|| CapabilityError::MalformedOutput("model returned no content".into()))
}

/// Minimal client for `POST {base_url}/chat/completions`.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CapabilityError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One deterministic chat completion.
    pub async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<String, CapabilityError> {
        let start = Instant::now();
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::status(status, body));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = completion_text(parsed)?;
        debug!(
            model,
            prompt_version = PROMPT_VERSION,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "chat completion"
        );
        Ok(text)
    }
}

/// Intent classifier backed by a chat model.
pub struct LlmClassifier {
    chat: ChatClient,
    model: String,
}

impl LlmClassifier {
    pub fn new(chat: ChatClient, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, CapabilityError> {
        let raw = self
            .chat
            .complete(&self.model, CLASSIFIER_PREAMBLE, &classifier_message(request))
            .await?;
        parse_classification(&raw).map_err(|e| CapabilityError::MalformedOutput(e.to_string()))
    }
}

/// Grounding validator backed by a chat model.
pub struct LlmValidator {
    chat: ChatClient,
    model: String,
}

impl LlmValidator {
    pub fn new(chat: ChatClient, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Validator for LlmValidator {
    async fn validate(
        &self,
        answer: &str,
        evidence: &[String],
    ) -> Result<ValidationVerdict, CapabilityError> {
        let raw = self
            .chat
            .complete(
                &self.model,
                VALIDATOR_PREAMBLE,
                &validator_message(answer, evidence),
            )
            .await?;
        Ok(parse_verdict(&raw))
    }
}
