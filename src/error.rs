//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::translate::anthropic_types::ErrorResponse;
use crate::translate::openai_types::ChatErrorResponse;

/// Client-facing error taxonomy. Each kind has a fixed HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Permission,
    RateLimit,
    Validation,
    Api,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Permission => StatusCode::FORBIDDEN,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Api => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `error.type` string of the inbound error envelope.
    pub fn wire_type(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Validation => "invalid_request_error",
            ErrorKind::Api | ErrorKind::Internal => "api_error",
        }
    }

    /// Classify an upstream HTTP status.
    pub fn from_upstream_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Permission,
            429 => ErrorKind::RateLimit,
            400 | 404 | 413 | 422 => ErrorKind::Validation,
            _ => ErrorKind::Api,
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Upstream {
        kind: ErrorKind,
        status: Option<u16>,
        message: String,
    },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn upstream(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::Upstream {
            kind,
            status: None,
            message: msg.into(),
        }
    }

    /// Build an error from a non-2xx upstream reply, preferring the
    /// provider's own `{"error": {"message": ..}}` text when present.
    pub fn from_upstream_reply(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ChatErrorResponse>(body) {
            Ok(err) if !err.error.message.is_empty() => err.error.message,
            _ => format!("Upstream returned status {}: {}", status, truncate(body, 500)),
        };

        Self::Upstream {
            kind: ErrorKind::from_upstream_status(status),
            status: Some(status),
            message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Json(_) => ErrorKind::Validation,
            Self::Upstream { kind, .. } => *kind,
            Self::Http(_) => ErrorKind::Api,
            Self::Config { .. } | Self::Translation { .. } | Self::Io(_) | Self::Toml(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.kind().wire_type(), self.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.kind().status();
        (status, Json(self.to_error_response())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_table() {
        assert_eq!(ErrorKind::Authentication.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Permission.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::RateLimit.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Api.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorKind::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_reply_uses_provider_message() {
        let err = GatewayError::from_upstream_reply(
            429,
            r#"{"error":{"message":"slow down","type":"rate_limit_exceeded"}}"#,
        );
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.to_string(), "slow down");

        let body = err.to_error_response();
        assert_eq!(body.error_type, "error");
        assert_eq!(body.error.error_type, "rate_limit_error");
    }

    #[test]
    fn test_upstream_reply_with_plain_body() {
        let err = GatewayError::from_upstream_reply(503, "Service Unavailable");
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
