//! Query normalization ahead of intent classification.
//!
//! Cleans malformed input, fixes common misspellings without touching
//! technical tokens (model numbers, connector names, units) and splits
//! compound questions into sub-questions.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::state::{RequestState, TypoCorrection};

/// Misspellings seen in pedal questions, keyed by lowercase form.
const TYPO_CORRECTIONS: &[(&str, &str)] = &[
    ("wnt", "want"),
    ("wan", "want"),
    ("wnat", "want"),
    ("bbuy", "buy"),
    ("buuy", "buy"),
    ("byu", "buy"),
    ("byy", "buy"),
    ("connnect", "connect"),
    ("connct", "connect"),
    ("conect", "connect"),
    ("conectt", "connect"),
    ("tto", "to"),
    ("teh", "the"),
    ("thee", "the"),
    ("taht", "that"),
    ("thta", "that"),
    ("hwo", "how"),
    ("hww", "how"),
    ("hoow", "how"),
    ("hriw", "how"),
    ("whta", "what"),
    ("waht", "what"),
    ("wht", "what"),
    ("cabel", "cable"),
    ("cabl", "cable"),
    ("cabble", "cable"),
    ("pric", "price"),
    ("priice", "price"),
    ("prce", "price"),
    ("efect", "effect"),
    ("effct", "effect"),
    ("efects", "effects"),
    ("efectts", "effects"),
    ("peadl", "pedal"),
    ("pedla", "pedal"),
    ("peddal", "pedal"),
    ("pedaal", "pedal"),
    ("ampp", "amp"),
    ("ammp", "amp"),
    ("guitr", "guitar"),
    ("gutar", "guitar"),
    ("guitarr", "guitar"),
    ("seeting", "setting"),
    ("seting", "setting"),
    ("settng", "setting"),
    ("manuall", "manual"),
    ("manul", "manual"),
    ("mannual", "manual"),
    ("turnn", "turn"),
    ("trn", "turn"),
    ("trun", "turn"),
    ("onn", "on"),
    ("oon", "on"),
];

const WORD_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

/// Tokens that are never spell-corrected: model numbers, connectors, units.
static TECHNICAL_TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(?:[A-Z]{2,}-?\d+[A-Z]?\b|(?:USB|MIDI|XLR|TRS|kHz|dB|Hz|V|mA)\b|1/4"|Ω)"#)
        .expect("TECHNICAL_TERM_RE regex should compile")
});

static REPEATED_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.,!?;:]{2,}").expect("REPEATED_PUNCT_RE regex should compile")
});

/// Signals that a query bundles more than one question.
static MULTI_QUESTION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\band\s+(?:how|what|where|when|why|who|can|does|is|are)\b",
        r"\b(?:also|plus)\s*,?\s*(?:how|what|where)\b",
        r"\?\s*(?:how|what|where|when|why)\b",
        r",\s*(?:and\s+)?(?:how|what|where)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("MULTI_QUESTION regex should compile"))
    .collect()
});

/// Split points. The separator ends where capture group 1 (the next
/// question word) begins; that word stays with the following sub-question.
static QUESTION_SEPARATOR_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\s+and\s+(how|what|where|when|why|can|does|is|are)\b",
        r"(?i)\?\s+(how|what|where|when|why)\b",
        r"(?i),\s*(?:and\s+)?(how|what|where)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("QUESTION_SEPARATOR regex should compile"))
    .collect()
});

/// Outcome of normalizing one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub original_query: String,
    /// Never empty when `original_query` is non-empty
    pub normalized_query: String,
    pub typos_corrected: Vec<TypoCorrection>,
    pub sub_questions: Vec<String>,
    pub has_multi_questions: bool,
    /// Confidence in the normalization itself, 0.5..=1.0
    pub confidence: f64,
}

impl PreprocessResult {
    /// Copy the normalization into the request state.
    pub fn apply_to(self, state: &mut RequestState) {
        state.normalized_query = self.normalized_query;
        state.sub_questions = self.sub_questions;
        state.typos_corrected = self.typos_corrected;
    }
}

/// Normalize a raw query.
pub fn preprocess(query: &str) -> PreprocessResult {
    // Detect on the raw text; structure is easier to see before correction.
    let (_, has_multi) = detect_multi_questions(query);

    let (corrected, typos) = correct_typos(query);
    let mut normalized = normalize_spacing(&corrected);
    if normalized.is_empty() && !query.is_empty() {
        normalized = query.to_string();
    }

    let sub_questions = if has_multi {
        split_questions(&normalized)
    } else {
        vec![normalized.clone()]
    };
    let has_multi = has_multi && sub_questions.len() > 1;

    let confidence = preprocessing_confidence(query, &normalized, typos.len(), has_multi);

    tracing::debug!(
        typos = typos.len(),
        multi = has_multi,
        confidence,
        "query preprocessed"
    );

    PreprocessResult {
        original_query: query.to_string(),
        normalized_query: normalized,
        typos_corrected: typos,
        sub_questions,
        has_multi_questions: has_multi,
        confidence,
    }
}

fn detect_multi_questions(query: &str) -> (Vec<String>, bool) {
    let lower = query.to_lowercase();
    if MULTI_QUESTION_RES.iter().any(|re| re.is_match(&lower)) {
        let parts = split_questions(query);
        let multi = parts.len() > 1;
        return (parts, multi);
    }
    (vec![query.to_string()], false)
}

/// Split a compound query. Returns the query itself when no meaningful split
/// exists.
pub fn split_questions(query: &str) -> Vec<String> {
    let mut parts = vec![query.to_string()];
    for separator in QUESTION_SEPARATOR_RES.iter() {
        parts = parts
            .iter()
            .flat_map(|part| split_before_group(part, separator))
            .collect();
    }

    let sub_questions: Vec<String> = parts
        .iter()
        .map(|p| p.trim().trim_matches(['.', ',', ';']).to_string())
        .filter(|p| p.chars().count() > 3)
        .collect();

    if sub_questions.len() <= 1 {
        return vec![query.to_string()];
    }
    sub_questions
}

fn split_before_group(text: &str, separator: &Regex) -> Vec<String> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in separator.captures_iter(text) {
        let (Some(whole), Some(next)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push(text[last..whole.start()].to_string());
        last = next.start();
    }
    out.push(text[last..].to_string());
    out
}

fn correct_typos(query: &str) -> (String, Vec<TypoCorrection>) {
    let cleaned = clean_special_chars(query);
    let mut corrected_words: Vec<String> = Vec::new();
    let mut typos = Vec::new();

    for word in cleaned.split_whitespace() {
        if is_technical_term(word) {
            corrected_words.push(word.to_string());
            continue;
        }

        let key = word.to_lowercase();
        let key = key.trim_matches(WORD_PUNCTUATION);
        let Some(replacement) = lookup_typo(key) else {
            corrected_words.push(word.to_string());
            continue;
        };

        let mut fixed = if word.chars().next().is_some_and(char::is_uppercase) {
            capitalize(replacement)
        } else {
            replacement.to_string()
        };
        if let Some(last) = word.chars().last().filter(|c| WORD_PUNCTUATION.contains(c)) {
            fixed.push(last);
        }

        typos.push(TypoCorrection {
            original: word.to_string(),
            corrected: fixed.clone(),
            position: corrected_words.len(),
        });
        corrected_words.push(fixed);
    }

    (corrected_words.join(" "), typos)
}

fn lookup_typo(word: &str) -> Option<&'static str> {
    TYPO_CORRECTIONS
        .iter()
        .find(|(typo, _)| *typo == word)
        .map(|(_, fix)| *fix)
}

fn is_technical_term(word: &str) -> bool {
    TECHNICAL_TERM_RE.is_match(word)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Strip `=`, collapse repeated punctuation and squash 3+ repeated word
/// characters down to two ("helllllo" → "hello").
pub fn clean_special_chars(query: &str) -> String {
    let without_eq = query.replace('=', "");
    let punct = REPEATED_PUNCT_RE.replace_all(&without_eq, |caps: &Captures| {
        caps[0].chars().next().map(String::from).unwrap_or_default()
    });

    let mut out = String::with_capacity(punct.len());
    let mut prev: Option<char> = None;
    let mut run = 0;
    for c in punct.chars() {
        if Some(c) == prev && (c.is_alphanumeric() || c == '_') {
            run += 1;
        } else {
            run = 1;
            prev = Some(c);
        }
        if run <= 2 {
            out.push(c);
        }
    }
    out
}

fn normalize_spacing(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn preprocessing_confidence(original: &str, normalized: &str, typos: usize, multi: bool) -> f64 {
    let mut confidence: f64 = 0.85;
    if typos > 5 {
        confidence -= 0.15;
    } else if typos > 3 {
        confidence -= 0.10;
    } else if typos > 1 {
        confidence -= 0.05;
    }
    if multi {
        confidence -= 0.05;
    }
    if typos >= 2 && original != normalized {
        confidence += 0.05;
    }
    confidence.clamp(0.5, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typos_corrected_with_positions() {
        let result = preprocess("hwo do i conect teh pedal");
        assert_eq!(result.normalized_query, "how do i connect the pedal");
        assert_eq!(result.typos_corrected.len(), 3);
        assert_eq!(result.typos_corrected[0].position, 0);
        assert_eq!(result.typos_corrected[1].original, "conect");
        assert_eq!(result.typos_corrected[2].position, 4);
    }

    #[test]
    fn test_capitalization_and_trailing_punctuation_preserved() {
        let result = preprocess("Waht is the pric?");
        assert_eq!(result.normalized_query, "What is the price?");
    }

    #[test]
    fn test_technical_terms_untouched() {
        let result = preprocess("does the DS-1 need 9 V and a TRS cable");
        assert!(result.typos_corrected.is_empty());
        assert!(result.normalized_query.contains("DS-1"));
        assert!(is_technical_term("MIDI"));
        assert!(is_technical_term("ds-1"));
        assert!(!is_technical_term("pedal"));
    }

    #[test]
    fn test_special_char_cleanup() {
        assert_eq!(clean_special_chars("r=th=urn"), "rthurn");
        assert_eq!(clean_special_chars("what?!?"), "what?");
        assert_eq!(clean_special_chars("helllllo"), "hello");
        assert_eq!(clean_special_chars("good"), "good");
    }

    #[test]
    fn test_multi_question_split() {
        let result = preprocess("I want to buy the DS-1 and how do I connect it to my amp");
        assert!(result.has_multi_questions);
        assert_eq!(
            result.sub_questions,
            vec!["I want to buy the DS-1", "how do I connect it to my amp"]
        );
    }

    #[test]
    fn test_question_mark_split_drops_separator() {
        let parts = split_questions("what does it cost? how loud is it");
        assert_eq!(parts, vec!["what does it cost", "how loud is it"]);
    }

    #[test]
    fn test_single_question_not_split() {
        let result = preprocess("What is the input impedance?");
        assert!(!result.has_multi_questions);
        assert_eq!(result.sub_questions, vec!["What is the input impedance?"]);
        assert_eq!(result.confidence, 0.85);
    }

    #[test]
    fn test_normalized_never_empty_for_nonempty_input() {
        let result = preprocess("===");
        assert_eq!(result.normalized_query, "===");

        let empty = preprocess("");
        assert!(empty.normalized_query.is_empty());
    }

    #[test]
    fn test_confidence_bounds() {
        let noisy = preprocess("hwo wnt byu conect teh cabel pric trn");
        assert!(noisy.typos_corrected.len() > 5);
        assert!((0.5..=1.0).contains(&noisy.confidence));
        assert!((noisy.confidence - 0.75).abs() < 1e-9);
    }
}
