//! Combining specialist outputs into one hybrid answer.

use crate::state::PricingData;

/// Phrases a manual specialist uses when it has no documentation at all.
const MANUAL_UNAVAILABLE_PHRASES: &[&str] = &[
    "don't have a manual",
    "don't have the manual",
    "no manual",
    "manual not indexed",
    "manual isn't available",
];

const PRICING_HEADER: &str = "\n\n**Current Market Pricing:**\n";

const ESTIMATED_PRICING_NOTE: &str =
    "\n\n*Note: Using estimated pricing data. Live marketplace data unavailable.*";

/// Whatever the hybrid branches brought back.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridParts<'a> {
    pub subject: &'a str,
    pub manual_text: Option<&'a str>,
    pub pricing_text: Option<&'a str>,
    pub pricing: Option<&'a PricingData>,
}

/// Whether a manual answer says the subject has no documentation.
pub fn reports_manual_unavailable(text: &str) -> bool {
    let lower = text.to_lowercase();
    MANUAL_UNAVAILABLE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Merge hybrid parts into a single answer text.
///
/// A "no manual" reply next to valid pricing becomes a plain statement of
/// the limitation instead of being pasted in verbatim.
pub fn merge_hybrid(parts: &HybridParts<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();
    let priced = parts.pricing.and_then(PricingData::priced);
    let manual = parts
        .manual_text
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let manual_unavailable = manual.is_some_and(reports_manual_unavailable);

    match manual {
        Some(text) if !manual_unavailable => sections.push(text.to_string()),
        Some(_) if priced.is_some() => sections.push(format!(
            "I don't currently have the **{}** manual indexed, so I can't provide details \
             about its features or specifications yet.",
            parts.subject
        )),
        _ => {}
    }

    if let Some(result) = priced {
        if !sections.is_empty() {
            sections.push(PRICING_HEADER.to_string());
        }
        match parts.pricing_text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => sections.push(text.to_string()),
            None => sections.push(result.summary()),
        }
        if result.source.is_low_trust() {
            sections.push(ESTIMATED_PRICING_NOTE.to_string());
        }
    }

    if sections.is_empty() {
        return format!(
            "I couldn't find complete information about the {}. The manual search didn't \
             return relevant results, and pricing data was unavailable.",
            parts.subject
        );
    }
    sections.join("\n")
}
