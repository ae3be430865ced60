//! Validator verdict parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_extract::parse_embedded_object;
use crate::state::clamp_unit;

const POSITIVE_SIGNALS: &[&str] = &["is_accurate\": true", "accurate", "grounded", "correct"];
const NEGATIVE_SIGNALS: &[&str] = &[
    "hallucination",
    "not in source",
    "unsupported",
    "contradiction",
];

/// The validator's accuracy verdict for one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_accurate: bool,
    pub hallucination_detected: bool,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl ValidationVerdict {
    pub fn accurate(reasoning: impl Into<String>) -> Self {
        Self {
            is_accurate: true,
            hallucination_detected: false,
            confidence: 0.85,
            issues: Vec::new(),
            reasoning: reasoning.into(),
        }
    }

    /// Quality notes describing this verdict.
    pub fn notes(&self, scope: &str) -> Vec<String> {
        let mut notes = Vec::with_capacity(self.issues.len() + 1);
        if !self.reasoning.is_empty() {
            notes.push(format!("Quality check ({scope}): {}", self.reasoning));
        }
        notes.extend(self.issues.iter().map(|i| format!("Issue: {i}")));
        notes
    }
}

/// Parse validator output. Never fails: unreadable output degrades to a
/// keyword reading of the raw text.
pub fn parse_verdict(raw: &str) -> ValidationVerdict {
    if let Some(map) = parse_embedded_object(raw) {
        let issues = match map.get("issues") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
        return ValidationVerdict {
            is_accurate: map
                .get("is_accurate")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            hallucination_detected: map
                .get("hallucination_detected")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            confidence: map
                .get("confidence")
                .and_then(Value::as_f64)
                .map(clamp_unit)
                .unwrap_or(0.8),
            issues,
            reasoning: map
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
    }

    let lower = raw.to_lowercase();
    let positive = POSITIVE_SIGNALS.iter().any(|s| lower.contains(s));
    let negative = NEGATIVE_SIGNALS.iter().any(|s| lower.contains(s));
    tracing::warn!(positive, negative, "validator output unparseable, using keyword signals");

    if positive && !negative {
        return ValidationVerdict::accurate("verdict inferred from positive signals");
    }
    ValidationVerdict {
        is_accurate: !negative,
        hallucination_detected: negative,
        confidence: 0.5,
        issues: vec!["validator output unreadable, manual review recommended".to_string()],
        reasoning: "verdict could not be parsed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_verdict_with_trailing_text() {
        let raw = "```json\n{\"is_accurate\": false, \"hallucination_detected\": true, \
                   \"confidence\": 0.3, \"issues\": [\"Claims 500kΩ but source says 1MΩ\"], \
                   \"reasoning\": \"unsupported claim\"}\n```\nLet me know if you need more.";
        let v = parse_verdict(raw);
        assert!(!v.is_accurate);
        assert!(v.hallucination_detected);
        assert_eq!(v.confidence, 0.3);
        assert_eq!(v.issues.len(), 1);
        assert_eq!(v.notes("answer").len(), 2);
    }

    #[test]
    fn test_missing_fields_default() {
        let v = parse_verdict("{}");
        assert!(v.is_accurate);
        assert!(!v.hallucination_detected);
        assert_eq!(v.confidence, 0.8);
        assert!(v.issues.is_empty());
    }

    #[test]
    fn test_keyword_fallback_positive() {
        let v = parse_verdict("The answer is accurate and grounded in the sources");
        assert!(v.is_accurate);
        assert_eq!(v.confidence, 0.85);
    }

    #[test]
    fn test_keyword_fallback_negative() {
        let v = parse_verdict("accurate mostly, but contains an unsupported claim");
        assert!(!v.is_accurate);
        assert!(v.hallucination_detected);
        assert_eq!(v.confidence, 0.5);
        assert_eq!(v.issues.len(), 1);
    }

    #[test]
    fn test_keyword_fallback_no_signal_is_cautious() {
        let v = parse_verdict("");
        assert!(v.is_accurate);
        assert!(!v.hallucination_detected);
        assert_eq!(v.confidence, 0.5);
    }
}
