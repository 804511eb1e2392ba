//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::api::CommandResponse;
use crate::monitor::MonitorError;
use crate::webhook::WebhookError;

/// Errors from the HTTP control surface.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind to {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Server stopped with an I/O error.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// No webhook with this id.
    #[error("Webhook not found: {0}")]
    WebhookNotFound(String),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Monitor(MonitorError::InvalidState { .. }) => StatusCode::CONFLICT,
            Self::Webhook(WebhookError::InvalidUrl { .. } | WebhookError::UnsupportedScheme(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::WebhookNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = CommandResponse::error("Request failed", self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorState;

    #[test]
    fn test_bind_error_display() {
        let error = ServerError::BindError {
            address: "127.0.0.1:8080".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert!(error.to_string().contains("Failed to bind to 127.0.0.1:8080"));
        assert!(error.to_string().contains("address in use"));
    }

    #[test]
    fn test_status_codes() {
        let conflict = ServerError::Monitor(MonitorError::InvalidState {
            operation: "pause",
            state: MonitorState::Stopped,
        });
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ServerError::WebhookNotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Webhook(WebhookError::UnsupportedScheme("ftp".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
