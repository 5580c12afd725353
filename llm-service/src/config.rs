//! Provider selection and model configuration.
//!
//! Configuration is environment-driven (`LLM_PROVIDER`, `LLM_MODEL`,
//! `LLM_ENDPOINT`, `LLM_API_KEY`, plus optional generation knobs) and
//! validated eagerly so a bad deployment fails at startup, not mid-workflow.

use crate::errors::{LlmError, LlmResult};

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    /// Deterministic in-process provider; never fails. Used in tests and as
    /// a no-network fallback.
    Mock,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "openai" => Self::OpenAi,
            "anthropic" => Self::Anthropic,
            "mock" => Self::Mock,
            _ => return None,
        })
    }
}

/// Universal model configuration consumed by every concrete service.
#[derive(Debug, Clone)]
pub struct LlmModelConfig {
    pub provider: LlmProvider,
    pub model: String,
    /// API base, e.g. "https://api.openai.com/v1". Ignored by the mock.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl LlmModelConfig {
    /// Build a config from the environment.
    ///
    /// # Errors
    /// Returns [`LlmError::Config`] for a missing/unknown provider, an empty
    /// model name, or a malformed endpoint.
    pub fn from_env() -> LlmResult<Self> {
        let provider_raw = must_env("LLM_PROVIDER")?;
        let provider = LlmProvider::parse(provider_raw.trim())
            .ok_or_else(|| LlmError::Config(format!("unsupported provider: {provider_raw}")))?;

        let model = must_env("LLM_MODEL")?;

        let endpoint = match provider {
            LlmProvider::OpenAi => {
                opt_env("LLM_ENDPOINT").unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            }
            LlmProvider::Anthropic => {
                opt_env("LLM_ENDPOINT").unwrap_or_else(|| "https://api.anthropic.com/v1".to_string())
            }
            LlmProvider::Mock => String::new(),
        };

        let cfg = Self {
            provider,
            model,
            endpoint,
            api_key: opt_env("LLM_API_KEY"),
            max_tokens: opt_env_u32("LLM_MAX_TOKENS")?.unwrap_or(2048),
            temperature: 0.2,
            timeout_secs: opt_env_u32("LLM_TIMEOUT_SECS")?.unwrap_or(180) as u64,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants shared by all providers.
    pub fn validate(&self) -> LlmResult<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::Config("model name must not be empty".into()));
        }
        if self.provider != LlmProvider::Mock {
            let ep = self.endpoint.trim();
            if !(ep.starts_with("http://") || ep.starts_with("https://")) {
                return Err(LlmError::Config(format!(
                    "endpoint must start with http:// or https://, got {ep:?}"
                )));
            }
            if self.api_key.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(LlmError::Config("LLM_API_KEY is required".into()));
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::Config("temperature out of range 0.0..=2.0".into()));
        }
        Ok(())
    }

    /// A config wired to the mock provider; handy in tests.
    pub fn mock() -> Self {
        Self {
            provider: LlmProvider::Mock,
            model: "mock-model".to_string(),
            endpoint: String::new(),
            api_key: None,
            max_tokens: 2048,
            temperature: 0.0,
            timeout_secs: 5,
        }
    }
}

/// Fetch a required, non-empty environment variable.
fn must_env(name: &'static str) -> LlmResult<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LlmError::Config(format!(
            "missing required environment variable: {name}"
        ))),
    }
}

fn opt_env(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn opt_env_u32(name: &'static str) -> LlmResult<Option<u32>> {
    match opt_env(name) {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| LlmError::Config(format!("invalid number in {name}: expected u32"))),
    }
}
