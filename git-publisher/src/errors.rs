//! Crate-wide error hierarchy for the provider client and publisher.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server).
//! - No dynamic dispatch; ergonomic `?` via `From` impls.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type GitResult<T> = Result<T, Error>;

/// Root error type for the git-publisher crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Provider (GitHub/GitLab) related failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Configuration problems (missing token, bad base URL).
    #[error("config error: {0}")]
    Config(String),

    /// Input validation errors (bad identifiers, empty batches).
    #[error("validation error: {0}")]
    Validation(String),
}

/// Detailed provider-specific error.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403). `abuse` marks secondary-rate-limit responses,
    /// which are retried like 429s.
    #[error("forbidden (abuse={abuse})")]
    Forbidden { abuse: bool },

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429 or abuse 403).
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Server error (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Other HTTP status not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Transport-level timeout.
    #[error("timeout")]
    Timeout,

    /// Network failure without a status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// JSON deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Unexpected/invalid shape of provider response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request rejected by provider-side validation (HTTP 422).
    #[error("provider validation: {0}")]
    Validation(String),
}

impl ProviderError {
    /// Whether a retry can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Server(_)
                | ProviderError::Timeout
                | ProviderError::Network(_)
                | ProviderError::Forbidden { abuse: true }
        )
    }

    /// Provider-advertised retry delay, when known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider(p) if p.is_transient())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Provider(ProviderError::from(e))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => ProviderError::Unauthorized,
                403 => ProviderError::Forbidden { abuse: false },
                404 => ProviderError::NotFound,
                429 => ProviderError::RateLimited {
                    retry_after_secs: None,
                },
                422 => ProviderError::Validation("unprocessable entity".into()),
                500..=599 => ProviderError::Server(code),
                _ => ProviderError::HttpStatus(code),
            };
        }
        ProviderError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Server(502).is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::RateLimited {
            retry_after_secs: Some(5)
        }
        .is_transient());
        assert!(ProviderError::Forbidden { abuse: true }.is_transient());

        assert!(!ProviderError::NotFound.is_transient());
        assert!(!ProviderError::Unauthorized.is_transient());
        assert!(!ProviderError::Forbidden { abuse: false }.is_transient());
        assert!(!ProviderError::Validation("bad line".into()).is_transient());
    }
}
