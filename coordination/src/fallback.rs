//! User-facing messages for rejected answers.
//!
//! Each fallback reason has its own template so the user learns what went
//! wrong and what to try next. Internal error text never appears here.

use crate::state::{FallbackReason, RequestState};

/// Message returned when the run itself failed.
pub const GENERIC_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while answering your question. Please try again in a moment.";

/// Build the fallback message for a rejected state.
pub fn fallback_message(state: &RequestState) -> String {
    let subject = display_subject(&state.subject);
    let query = if state.normalized_query.trim().is_empty() {
        state.query.trim()
    } else {
        state.normalized_query.trim()
    };

    match state.fallback_reason {
        FallbackReason::AmbiguousQuery => clarification(&subject, query),
        FallbackReason::LowRelevance => format!(
            "I found some information in the {subject} manual, but it doesn't directly \
             answer your question about \"{query}\".\n\n\
             Try rephrasing with more specific terms, or ask about a particular feature \
             like power requirements, effects, connections, or settings."
        ),
        FallbackReason::ConceptNotExplicit => format!(
            "The {subject} manual doesn't explicitly cover this topic.\n\n\
             The manual contains information about settings, specifications, and features, \
             but this particular concept may not be documented in a way I can retrieve.\n\n\
             Would you like me to try a different angle? For example, I can tell you about \
             specific effects, controls, or technical specs."
        ),
        FallbackReason::RetrievalFailed => format!(
            "I wasn't able to search the {subject} manual successfully. \
             This could be a temporary issue.\n\n\
             Please try your question again, or ask about a specific feature."
        ),
        FallbackReason::HallucinationDetected => format!(
            "I found some information, but I'm not confident it accurately answers \
             your question about the {subject}.\n\n\
             To avoid giving you incorrect information, I'd recommend:\n\
             • Rephrasing your question more specifically\n\
             • Checking the manual directly for this topic"
        ),
        FallbackReason::RouterError => "I had trouble understanding your question.\n\n\
             Could you rephrase it? For example:\n\
             • \"What effects does this pedal have?\"\n\
             • \"How do I save a patch?\"\n\
             • \"What's the price of this pedal?\""
            .to_string(),
        FallbackReason::DataMissing => format!(
            "This information isn't covered in the {subject} manual.\n\n\
             The manual focuses on operation, settings, and specifications. \
             If you're looking for something else, try checking the manufacturer's website."
        ),
        FallbackReason::None => format!(
            "I couldn't find reliable information about that in the {subject} manual. \
             Could you rephrase your question or ask about a specific feature?"
        ),
    }
}

fn clarification(subject: &str, query: &str) -> String {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| *w == "put" || *w == "on") {
        format!(
            "I'm not sure what you mean. Are you asking about:\n\
             • **Powering on** the {subject}?\n\
             • **Enabling an effect** or patch?\n\
             • **Connecting cables** to the inputs/outputs?\n\n\
             Please clarify and I'll help you find the answer."
        )
    } else if words.contains(&"chain") {
        format!(
            "The {subject} manual doesn't explicitly describe a fixed signal chain. \
             Effects are arranged internally by patch, and their routing may vary.\n\n\
             Would you like to know about:\n\
             • The **effects order** within patches?\n\
             • How to **connect** the pedal to your amp/pedalboard?\n\
             • The **input/output connections**?"
        )
    } else {
        format!(
            "Your question is a bit vague. Could you be more specific about what \
             you'd like to know about the {subject}?\n\n\
             For example:\n\
             • \"How do I power on the {subject}?\"\n\
             • \"What effects does the {subject} include?\"\n\
             • \"What are the power requirements?\""
        )
    }
}

fn display_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.is_empty() {
        "this pedal".to_string()
    } else {
        trimmed.to_string()
    }
}
