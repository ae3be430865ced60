//! Parsing of classifier output into a typed [`Classification`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_extract::{parse_embedded_object, strip_code_fences};
use crate::state::{clamp_unit, Intent};

/// Confidence assigned when only the intent label could be recovered.
const REGEX_FALLBACK_CONFIDENCE: f64 = 0.7;

/// Confidence assumed when the model omits the field.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Cap for the typo-correction nudge.
const TYPO_NUDGE_CAP: f64 = 0.95;

static INTENT_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""intent"\s*:\s*"(\w+)""#).expect("INTENT_FIELD_RE regex should compile")
});

/// A classifier verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Corrected product name, when the classifier recognised one
    pub subject: Option<String>,
    pub confidence: f64,
    pub rationale: String,
}

impl Classification {
    /// Raise confidence slightly when normalization fixed several typos.
    pub fn nudged_for_typos(mut self, typos_corrected: usize) -> Self {
        if typos_corrected >= 2 {
            self.confidence = (self.confidence + 0.05).min(TYPO_NUDGE_CAP);
        }
        self
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClassificationParseError {
    #[error("classifier returned empty output")]
    Empty,
    #[error("classifier output is not parseable: {0}")]
    Unparseable(String),
}

/// Parse classifier output.
///
/// Accepts fenced or bare JSON, upper- or lower-case intent labels and
/// either `subject` or `pedal_name` for the product. Unknown intents map to
/// `manual_question`. When the JSON is broken but an `"intent"` field is
/// still visible, that label is used at a fixed confidence.
pub fn parse_classification(raw: &str) -> Result<Classification, ClassificationParseError> {
    let stripped = strip_code_fences(raw);
    if stripped.is_empty() {
        return Err(ClassificationParseError::Empty);
    }

    if let Some(map) = parse_embedded_object(stripped) {
        let label = map
            .get("intent")
            .and_then(Value::as_str)
            .unwrap_or("MANUAL_QUESTION");
        let subject = map
            .get("subject")
            .or_else(|| map.get("pedal_name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let confidence = map
            .get("confidence")
            .and_then(number_like)
            .map(clamp_unit)
            .unwrap_or(DEFAULT_CONFIDENCE);
        let rationale = map
            .get("rationale")
            .or_else(|| map.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        return Ok(Classification {
            intent: intent_or_default(label),
            subject,
            confidence,
            rationale,
        });
    }

    if let Some(caps) = INTENT_FIELD_RE.captures(stripped) {
        tracing::warn!("classifier output was not valid JSON, recovered intent by pattern");
        return Ok(Classification {
            intent: intent_or_default(&caps[1]),
            subject: None,
            confidence: REGEX_FALLBACK_CONFIDENCE,
            rationale: "intent recovered from malformed output".to_string(),
        });
    }

    let preview: String = stripped.chars().take(80).collect();
    Err(ClassificationParseError::Unparseable(preview))
}

fn intent_or_default(label: &str) -> Intent {
    Intent::from_label(label).unwrap_or_else(|| {
        tracing::warn!(label, "unknown intent label, defaulting to manual_question");
        Intent::ManualQuestion
    })
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
