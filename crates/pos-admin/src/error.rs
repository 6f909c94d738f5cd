//! Error types for the admin server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for admin operations.
pub type AdminResult<T> = Result<T, AdminError>;

/// Message returned for every unexpected failure.
pub const GENERIC_ERROR_MESSAGE: &str = "Internal server error";

/// Errors that can occur in the admin server.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),

    /// Invalid request parameters.
    #[error("{0}")]
    InvalidRequest(String),

    /// Attack storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] pos_audit::AuditError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::BindFailed(_, _) | Self::Storage(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Admin request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR_MESSAGE.to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

/// Response for a request whose handler panicked.
pub fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    AdminError::Internal("request handler panicked".to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_request_error_response() {
        let err = AdminError::InvalidRequest("IP address is required".to_string());
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "IP address is required");
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let err = AdminError::Internal("connection refused at 10.0.0.5:5432".to_string());
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], GENERIC_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_storage_error_response() {
        let err = AdminError::from(pos_audit::AuditError::Storage("disk full".into()));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(!json["message"].as_str().unwrap().contains("disk"));
    }

    #[tokio::test]
    async fn test_panic_response_is_generic() {
        let response = panic_response(Box::new("index out of bounds"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["message"], GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn test_error_display() {
        let err = AdminError::InvalidRequest("bad param".to_string());
        assert_eq!(err.to_string(), "bad param");
    }
}
