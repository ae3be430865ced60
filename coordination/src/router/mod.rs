//! Intent routing rules
//!
//! Deterministic half of the router: casual-phrase detection, the keyword
//! heuristic used when the classifier is unavailable, and parsing of
//! classifier output. The async router agent drives these.
//!
//! ```text
//! Query signal              | Intent
//! --------------------------|------------------
//! greeting / small talk     | casual (canned reply)
//! classifier verdict        | as classified
//! purchase + usage keywords | hybrid   (fallback)
//! purchase keywords only    | pricing  (fallback)
//! anything else             | manual_question (fallback)
//! ```

pub mod classification;
pub mod keywords;

pub use classification::{parse_classification, Classification, ClassificationParseError};
pub use keywords::{is_casual, keyword_intent, CASUAL_REPLY};

/// Confidence assigned by the keyword fallback.
pub const KEYWORD_FALLBACK_CONFIDENCE: f64 = 0.5;
