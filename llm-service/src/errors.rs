//! Unified error type for LLM calls.
//!
//! Provider failures are wrapped with the provider name attached so agent
//! logs can attribute a failure without string matching.

use thiserror::Error;

/// Result alias for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors produced by the LLM service.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Configuration problem (provider, endpoint, key, model).
    #[error("llm config error: {0}")]
    Config(String),

    /// Transport-level failure (connect, DNS, timeout).
    #[error("llm transport error ({provider}): {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from the provider.
    #[error("llm http {status} from {provider}: {snippet}")]
    HttpStatus {
        provider: &'static str,
        status: u16,
        /// Short body prefix for logs; never the full payload.
        snippet: String,
        /// Seconds to wait before retrying, when the provider said so.
        retry_after_secs: Option<u64>,
    },

    /// Response body did not match the expected schema.
    #[error("llm decode error ({provider}): {source}")]
    Decode {
        provider: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The call was cancelled through the caller's cancellation token.
    #[error("llm call cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether a retry can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport { .. } => true,
            LlmError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Provider-advertised retry delay, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LlmError::HttpStatus {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}
