//! HTTP-facing webhook errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Reasons a webhook request is rejected before dispatch.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The source address is not on the allow-list.
    #[error("source address {0} is not allowed")]
    Forbidden(String),

    /// The body is not valid JSON.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The event-type header is missing.
    #[error("missing event type header")]
    MissingEventType,

    /// The isolated unit could not be started.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidPayload(_) | Self::MissingEventType => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Generic bodies only; details go to the log.
        let body = match &self {
            Self::Forbidden(_) => "Forbidden",
            Self::InvalidPayload(_) => "Invalid payload",
            Self::MissingEventType => "Missing event type",
            Self::Internal(_) => "Internal server error",
        };
        (self.status_code(), body).into_response()
    }
}
