//! Collaborator error taxonomy with retry classification.
//!
//! Every failure of an external capability (classifier, specialist,
//! validator) is represented here. Callers ask `is_retriable()` /
//! `retry_category()` instead of matching on message text.
//!
//! ## Retry categories
//!
//! | Category   | Retriable | Max retries |
//! |------------|-----------|-------------|
//! | Transient  | yes       | 3           |
//! | RateLimit  | yes       | 5           |
//! | Malformed  | no        | -           |
//! | Rejected   | no        | -           |
//! | Cancelled  | no        | -           |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification used to decide whether a call is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Network failure, timeout or 5xx from the collaborator.
    Transient,
    /// 429 from the collaborator; retry with back-off.
    RateLimit,
    /// The collaborator answered but the output could not be used.
    Malformed,
    /// 4xx or bad configuration. Repeating the call will not help.
    Rejected,
    /// The request was cancelled by the caller.
    Cancelled,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }

    /// Retry ceiling for this category; `None` when retrying is pointless.
    pub fn default_max_retries(self) -> Option<u32> {
        match self {
            Self::Transient => Some(3),
            Self::RateLimit => Some(5),
            _ => None,
        }
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Malformed => write!(f, "malformed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of an external capability call.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Connection refused, reset, DNS failure and the like.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Output arrived but could not be interpreted.
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    /// The specialist returned a payload for a different capability.
    #[error("unexpected answer kind: {0}")]
    UnexpectedAnswer(String),

    /// The task running the call panicked or was aborted.
    #[error("task failed: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CapabilityError {
    /// Which retry policy applies to this failure.
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Transport(_) | Self::Timeout(_) => RetryCategory::Transient,
            Self::Status { status, .. } => match status {
                429 => RetryCategory::RateLimit,
                500..=599 => RetryCategory::Transient,
                _ => RetryCategory::Rejected,
            },
            Self::MalformedOutput(_) | Self::UnexpectedAnswer(_) => RetryCategory::Malformed,
            Self::Cancelled => RetryCategory::Cancelled,
            Self::Configuration(_) | Self::Panicked(_) => RetryCategory::Rejected,
        }
    }

    /// Returns `true` if repeating the call may succeed.
    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        // Keep upstream error bodies short in logs and quality notes.
        if body.len() > 200 {
            let cut = (0..=200).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
            body.truncate(cut);
            body.push('…');
        }
        Self::Status { status, body }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::MalformedOutput(err.to_string());
        }
        match err.status() {
            Some(status) => Self::status(status.as_u16(), err.to_string()),
            None => Self::Transport(err.to_string()),
        }
    }
}
