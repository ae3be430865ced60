//! HTTP implementations of the capability traits.
//!
//! - [`llm`]: classifier and validator over an OpenAI-compatible chat endpoint
//! - [`specialists`]: manual and pricing specialists as JSON services

pub mod llm;
pub mod specialists;

pub use llm::{ChatClient, LlmClassifier, LlmValidator};
pub use specialists::HttpSpecialist;

use std::sync::Arc;

use coordination::SpecialistKind;

use crate::capabilities::SpecialistRegistry;
use crate::config::PedalConfig;
use crate::errors::CapabilityError;
use crate::orchestrator::Orchestrator;

/// Build an engine wired to the HTTP capabilities named in `config`.
pub fn http_orchestrator(config: &PedalConfig) -> Result<Orchestrator, CapabilityError> {
    let chat = ChatClient::new(&config.llm)?;
    let classifier = Arc::new(LlmClassifier::new(
        chat.clone(),
        config.llm.classifier_model.clone(),
    ));
    let validator = Arc::new(LlmValidator::new(chat, config.llm.validator_model.clone()));
    let specialists = SpecialistRegistry::new()
        .with(Arc::new(HttpSpecialist::new(
            SpecialistKind::Manual,
            config.specialists.manual_url.clone(),
        )?))
        .with(Arc::new(HttpSpecialist::new(
            SpecialistKind::Pricing,
            config.specialists.pricing_url.clone(),
        )?));
    Ok(Orchestrator::from_config(
        config,
        classifier,
        specialists,
        validator,
    ))
}
