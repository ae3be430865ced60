//! System prompts and message builders for the model-backed capabilities.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content changes
//! so logged classifications can be traced back to the prompt that produced
//! them.

use crate::capabilities::ClassificationRequest;

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Intent classifier preamble.
pub const CLASSIFIER_PREAMBLE: &str = "\
You classify questions sent to a guitar pedal assistant.

Choose EXACTLY ONE intent:
- MANUAL_QUESTION: answerable from the pedal's manual, spec sheet or effects list \
  (input impedance, presets, power requirements, built-in effects).
- PRICING: market price, value or where to buy.
- EXPLANATION: tone, feel or usage advice that the manual does not document.
- HYBRID: more than one of the above in one message \
  (\"what effects does it have and what's the price?\").
- CASUAL: greetings and small talk.

Rules:
- Listing or counting effects, amp models or presets is MANUAL_QUESTION.
- A usage question combined with buying or price keywords is HYBRID.
- Use the conversation context to resolve pronouns like \"it\" or \"this\".

Respond with ONLY a JSON object:
{\"intent\": \"MANUAL_QUESTION\", \"subject\": \"Zoom G3Xn\", \"confidence\": 0.95, \
\"rationale\": \"Asks for documented specs.\"}
Set \"subject\" to null when the product is unclear. \"confidence\" is between 0.0 and 1.0.";

/// Answer validator preamble.
pub const VALIDATOR_PREAMBLE: &str = "\
You check whether an answer is grounded in the source material it was built from.

Check for:
1. Claims that do not appear in the sources.
2. Contradictions with the sources.
3. Wrong numbers or specifications.
4. Missing critical warnings (minor omissions are fine).

Respond with ONLY a JSON object:
{\"is_accurate\": true, \"hallucination_detected\": false, \"confidence\": 0.95, \
\"issues\": [], \"reasoning\": \"All specs match the sources.\"}
List each unsupported or contradicted claim in \"issues\".";

/// User message for a classification call.
pub fn classifier_message(request: &ClassificationRequest) -> String {
    let mut message = String::new();
    if !request.subject.trim().is_empty() {
        message.push_str(&format!("Selected pedal: {}\n", request.subject.trim()));
    }
    if !request.context.is_empty() {
        message.push_str("Recent conversation:\n");
        for turn in &request.context {
            message.push_str(&format!("- {turn}\n"));
        }
    }
    message.push_str(&format!("Question: {}", request.query));
    message
}

/// User message for a validation call.
pub fn validator_message(answer: &str, evidence: &[String]) -> String {
    let sources = evidence
        .iter()
        .enumerate()
        .map(|(i, snippet)| format!("Source {}:\n{}", i + 1, snippet))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    format!("Source material:\n{sources}\n\nAnswer to check:\n{answer}")
}
