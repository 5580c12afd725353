//! HTTP error envelope.
//!
//! Every error response is `{code, message, requestId, details?}`. Messages
//! stay generic unless the deployment runs in dev mode, in which case the
//! underlying error text rides along in `details`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error with its HTTP mapping.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            details: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized")
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", what)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
    }

    pub fn with_details(mut self, details: impl Into<String>, dev_mode: bool) -> Self {
        if dev_mode {
            self.details = Some(details.into());
        }
        self
    }

    /// Map a component error onto the §7 table.
    pub fn from_engine(e: workflow_engine::EngineError, dev_mode: bool) -> Self {
        use workflow_engine::EngineError;
        let (status, code) = match &e {
            EngineError::Storage(storage::StorageError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            EngineError::Provider(git_publisher::Error::Provider(p)) => match p {
                git_publisher::ProviderError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
                git_publisher::ProviderError::Unauthorized => {
                    (StatusCode::UNAUTHORIZED, "unauthorized")
                }
                git_publisher::ProviderError::Forbidden { .. } => {
                    (StatusCode::FORBIDDEN, "forbidden")
                }
                git_publisher::ProviderError::RateLimited { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limited")
                }
                _ => (StatusCode::BAD_GATEWAY, "provider_error"),
            },
            EngineError::Provider(_) => (StatusCode::BAD_REQUEST, "validation"),
            EngineError::QueueClosed => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, code, "request failed").with_details(e.to_string(), dev_mode)
    }

    pub fn from_storage(e: storage::StorageError, dev_mode: bool) -> Self {
        let (status, code) = match &e {
            storage::StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        };
        Self::new(status, code, "request failed").with_details(e.to_string(), dev_mode)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                code = self.code,
                request_id = %self.request_id,
                details = ?self.details,
                "request failed"
            );
        }
        let body = axum::Json(json!({
            "code": self.code,
            "message": self.message,
            "requestId": self.request_id,
            "details": self.details,
        }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_only_in_dev_mode() {
        let prod = ApiError::bad_request("nope").with_details("secret detail", false);
        assert!(prod.details.is_none());

        let dev = ApiError::bad_request("nope").with_details("useful detail", true);
        assert_eq!(dev.details.as_deref(), Some("useful detail"));
    }

    #[test]
    fn every_error_carries_a_request_id() {
        let a = ApiError::unauthorized();
        let b = ApiError::unauthorized();
        assert!(!a.request_id.is_empty());
        assert_ne!(a.request_id, b.request_id);
    }
}
