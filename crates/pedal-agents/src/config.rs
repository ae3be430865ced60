use std::path::{Path, PathBuf};
use std::time::Duration;

use coordination::{GateConfig, HeuristicMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_CONFIG_PATH: &str = "PEDAL_CONFIG";
pub const ENV_LLM_BASE_URL: &str = "PEDAL_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "PEDAL_LLM_API_KEY";
pub const ENV_CLASSIFIER_MODEL: &str = "PEDAL_CLASSIFIER_MODEL";
pub const ENV_VALIDATOR_MODEL: &str = "PEDAL_VALIDATOR_MODEL";
pub const ENV_MANUAL_URL: &str = "PEDAL_MANUAL_URL";
pub const ENV_PRICING_URL: &str = "PEDAL_PRICING_URL";
pub const ENV_CLASSIFY_TIMEOUT_MS: &str = "PEDAL_CLASSIFY_TIMEOUT_MS";
pub const ENV_SPECIALIST_TIMEOUT_MS: &str = "PEDAL_SPECIALIST_TIMEOUT_MS";
pub const ENV_VALIDATE_TIMEOUT_MS: &str = "PEDAL_VALIDATE_TIMEOUT_MS";
pub const ENV_FANOUT_TIMEOUT_MS: &str = "PEDAL_FANOUT_TIMEOUT_MS";
pub const ENV_CLASSIFY_RETRIES: &str = "PEDAL_CLASSIFY_RETRIES";
pub const ENV_CONTEXT_TURNS: &str = "PEDAL_CONTEXT_TURNS";
pub const ENV_RELEVANCE_THRESHOLD: &str = "PEDAL_RELEVANCE_THRESHOLD";
pub const ENV_HEURISTIC_MODE: &str = "PEDAL_HEURISTIC_MODE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// OpenAI-compatible chat endpoint used by the classifier and validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub classifier_model: String,
    pub validator_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".into(),
            api_key: "local".into(),
            classifier_model: "llama-3.1-8b-instant".into(),
            validator_model: "llama-3.1-8b-instant".into(),
        }
    }
}

/// Specialist service endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialistConfig {
    pub manual_url: String,
    pub pricing_url: String,
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            manual_url: "http://localhost:8001/manual/answer".into(),
            pricing_url: "http://localhost:8001/pricing/answer".into(),
        }
    }
}

/// Per-call time limits, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub classify_ms: u64,
    /// One specialist branch
    pub specialist_ms: u64,
    pub validate_ms: u64,
    /// The whole hybrid fan-out join
    pub fanout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classify_ms: 10_000,
            specialist_ms: 30_000,
            validate_ms: 20_000,
            fanout_ms: 45_000,
        }
    }
}

impl TimeoutConfig {
    pub fn classify(&self) -> Duration {
        Duration::from_millis(self.classify_ms)
    }

    pub fn specialist(&self) -> Duration {
        Duration::from_millis(self.specialist_ms)
    }

    pub fn validate(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }

    pub fn fanout(&self) -> Duration {
        Duration::from_millis(self.fanout_ms)
    }
}

/// Top-level engine configuration.
///
/// Precedence: built-in defaults, then the TOML file, then `PEDAL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PedalConfig {
    pub llm: LlmConfig,
    pub specialists: SpecialistConfig,
    pub timeouts: TimeoutConfig,
    /// Extra classifier attempts on retriable errors.
    pub classification_retries: u32,
    pub retry_backoff_ms: u64,
    /// Conversation turns sent to the classifier as context.
    pub context_turns: usize,
    pub gate: GateConfig,
}

impl Default for PedalConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            specialists: SpecialistConfig::default(),
            timeouts: TimeoutConfig::default(),
            classification_retries: 2,
            retry_backoff_ms: 250,
            context_turns: 4,
            gate: GateConfig::default(),
        }
    }
}

impl PedalConfig {
    /// Load configuration from an optional file and the process environment.
    ///
    /// When `path` is `None`, `PEDAL_CONFIG` is consulted; with neither set
    /// only defaults and env overrides apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_LLM_BASE_URL) {
            self.llm.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get(ENV_LLM_API_KEY) {
            self.llm.api_key = v;
        }
        if let Some(v) = get(ENV_CLASSIFIER_MODEL) {
            self.llm.classifier_model = v;
        }
        if let Some(v) = get(ENV_VALIDATOR_MODEL) {
            self.llm.validator_model = v;
        }
        if let Some(v) = get(ENV_MANUAL_URL) {
            self.specialists.manual_url = v;
        }
        if let Some(v) = get(ENV_PRICING_URL) {
            self.specialists.pricing_url = v;
        }
        if let Some(v) = get(ENV_CLASSIFY_TIMEOUT_MS) {
            self.timeouts.classify_ms = parse_value(ENV_CLASSIFY_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_SPECIALIST_TIMEOUT_MS) {
            self.timeouts.specialist_ms = parse_value(ENV_SPECIALIST_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_VALIDATE_TIMEOUT_MS) {
            self.timeouts.validate_ms = parse_value(ENV_VALIDATE_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_FANOUT_TIMEOUT_MS) {
            self.timeouts.fanout_ms = parse_value(ENV_FANOUT_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_CLASSIFY_RETRIES) {
            self.classification_retries = parse_value(ENV_CLASSIFY_RETRIES, &v)?;
        }
        if let Some(v) = get(ENV_CONTEXT_TURNS) {
            self.context_turns = parse_value(ENV_CONTEXT_TURNS, &v)?;
        }
        if let Some(v) = get(ENV_RELEVANCE_THRESHOLD) {
            let threshold: f64 = parse_value(ENV_RELEVANCE_THRESHOLD, &v)?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidValue {
                    key: ENV_RELEVANCE_THRESHOLD,
                    value: v,
                    reason: "must be within [0, 1]".into(),
                });
            }
            self.gate.low_relevance_threshold = threshold;
        }
        if let Some(v) = get(ENV_HEURISTIC_MODE) {
            self.gate.heuristic_mode =
                v.parse::<HeuristicMode>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: ENV_HEURISTIC_MODE,
                        value: v.clone(),
                        reason,
                    })?;
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Check if an OpenAI-compatible endpoint is reachable (GET {url}/models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

/// Check if a specialist service answers at all. Any HTTP response counts.
pub async fn check_service(url: &str) -> bool {
    reqwest::Client::new()
        .get(url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .is_ok()
}
