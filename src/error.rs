//! Error handling for Yardwatch

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network error (collaborator unreachable)
    #[error("Network error: {0}")]
    Network(String),

    /// A bounded call did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Message bus error
    #[error("Bus error: {0}")]
    Bus(String),

    /// Inference service error
    #[error("Inference error: {0}")]
    Inference(String),

    /// Actuator command error
    #[error("Actuator error: {0}")]
    Actuator(String),

    /// Settings store error
    #[error("Settings store error: {0}")]
    SettingsStore(String),

    /// Event log write error
    #[error("Event log error: {0}")]
    EventLog(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Network(msg) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR", msg.clone()),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            Error::Bus(msg) => (StatusCode::BAD_GATEWAY, "BUS_ERROR", msg.clone()),
            Error::Inference(msg) => (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", msg.clone()),
            Error::Actuator(msg) => (StatusCode::BAD_GATEWAY, "ACTUATOR_ERROR", msg.clone()),
            Error::SettingsStore(msg) => (
                StatusCode::BAD_GATEWAY,
                "SETTINGS_STORE_ERROR",
                msg.clone(),
            ),
            Error::EventLog(msg) => (StatusCode::BAD_GATEWAY, "EVENT_LOG_ERROR", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        let resp = Error::NotFound("event".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_status() {
        let resp = Error::Validation("limit".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_collaborator_failures_map_to_bad_gateway() {
        let resp = Error::Inference("model offline".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let resp = Error::Timeout("inference".into()).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
