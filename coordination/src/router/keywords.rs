//! Keyword rules used when no classifier verdict is available.

use crate::state::Intent;

/// Greetings and small talk that never reach a specialist.
pub const CASUAL_PHRASES: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "howdy",
    "sup",
    "yo",
    "how are you",
    "how r u",
    "how are you doing",
    "whats up",
    "what's up",
    "how do you do",
    "good morning",
    "good afternoon",
    "good evening",
    "nice to meet you",
    "pleasure to meet you",
];

/// Canned reply for casual queries.
pub const CASUAL_REPLY: &str = "I'm here to help with your guitar pedal questions! \
                                What would you like to know about the manual?";

/// Extra words allowed around a casual phrase ("hey there", "hi, good morning").
const CASUAL_SLACK_WORDS: usize = 2;

/// Purchase / market signals.
pub const PRICING_KEYWORDS: &[&str] = &[
    "price",
    "cost",
    "buy",
    "purchase",
    "sell",
    "worth",
    "value",
    "cheapest",
    "expensive",
    "want to buy",
    "looking to buy",
    "get one",
    "get 3",
    "i want",
];

/// Usage / documentation signals.
pub const MANUAL_KEYWORDS: &[&str] = &[
    "how",
    "what",
    "setting",
    "manual",
    "use",
    "connect",
    "turn on",
    "put it on",
    "set up",
    "install",
    "does it",
];

/// Whether the query is a greeting or small talk.
///
/// Matches a phrase exactly, or a phrase at the start or end of the query
/// with at most two surrounding words, so "how do you do a factory reset"
/// is not treated as casual.
pub fn is_casual(query: &str) -> bool {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '!' | '?' | '.' | ',') { ' ' } else { c })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.is_empty() {
        return false;
    }
    let text = words.join(" ");

    CASUAL_PHRASES.iter().any(|phrase| {
        if text == *phrase {
            return true;
        }
        let extra = words
            .len()
            .saturating_sub(phrase.split_whitespace().count());
        if extra > CASUAL_SLACK_WORDS {
            return false;
        }
        text.starts_with(&format!("{phrase} ")) || text.ends_with(&format!(" {phrase}"))
    })
}

pub fn has_pricing_signal(query: &str) -> bool {
    let lower = query.to_lowercase();
    PRICING_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn has_manual_signal(query: &str) -> bool {
    let lower = query.to_lowercase();
    MANUAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Heuristic intent: purchase + usage ⇒ hybrid, purchase only ⇒ pricing,
/// anything else ⇒ manual question.
pub fn keyword_intent(query: &str) -> Intent {
    match (has_pricing_signal(query), has_manual_signal(query)) {
        (true, true) => Intent::Hybrid,
        (true, false) => Intent::Pricing,
        _ => Intent::ManualQuestion,
    }
}
