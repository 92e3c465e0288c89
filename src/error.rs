//! # Error Handling
//!
//! Custom error types and their conversion to HTTP responses.
//!
//! The taxonomy mirrors how failures are actually handled in this system:
//! gateway failures (SFU, AI) are caught at the call site and either
//! surfaced to HTTP callers with the upstream status or degraded to empty
//! results in the transcription pipeline; protocol violations on the
//! WebSocket never reach this type at all (they are logged and dropped
//! per-message); state violations are no-op results, not errors.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application-level error for the HTTP surface.
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems (lock poisoning, unexpected internal state).
    Internal(String),

    /// Client sent invalid or malformed data.
    BadRequest(String),

    /// Requested resource does not exist.
    NotFound(String),

    /// Configuration file or environment variable problems.
    ConfigError(String),

    /// User input failed validation rules.
    ValidationError(String),

    /// An external gateway (SFU or AI) returned a non-2xx response or was
    /// unreachable. Carries the upstream HTTP status where one exists.
    Gateway { status: u16, message: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Gateway { status, message } => {
                write!(f, "Gateway error ({}): {}", status, message)
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::Gateway { status, message } => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "gateway_error",
                format!("upstream status {}: {}", status, message),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Transport-level failures talking to a gateway (connect refused, TLS,
/// timeouts). There is no upstream status in that case, so 502 stands in.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16()).unwrap_or(502);
        AppError::Gateway {
            status,
            message: err.to_string(),
        }
    }
}

/// Shorthand for Results carrying our error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_upstream_status() {
        let err = AppError::Gateway {
            status: 403,
            message: "invalid app token".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("invalid app token"));
    }

    #[test]
    fn test_gateway_maps_to_bad_gateway() {
        let err = AppError::Gateway {
            status: 500,
            message: "boom".to_string(),
        };
        let resp = err.error_response();
        assert_eq!(resp.status().as_u16(), 502);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = AppError::NotFound("no such session".to_string());
        assert_eq!(err.error_response().status().as_u16(), 404);
    }
}
