//! Hub and HTTP error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::SessionId;
use serde_json::json;
use thiserror::Error;

/// Errors returned by [`crate::Hub`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The session is not (or no longer) registered.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    /// `max_connections` sessions are already live.
    #[error("connection limit reached ({0})")]
    CapacityReached(usize),
    /// The hub no longer accepts sessions.
    #[error("hub is shutting down")]
    ShuttingDown,
}

/// Error answered by the HTTP control surface as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid request body.
    #[error("{0}")]
    BadRequest(String),
    /// No route for the path.
    #[error("not found: {0}")]
    NotFound(String),
    /// Known path, wrong method.
    #[error("method not allowed")]
    MethodNotAllowed,
    /// `GET /ws` without upgrade headers.
    #[error("Expected Upgrade: websocket")]
    UpgradeRequired,
    /// At capacity or shutting down.
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::UnknownSession(_) => Self::NotFound(err.to_string()),
            HubError::CapacityReached(_) | HubError::ShuttingDown => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        if matches!(self, Self::UpgradeRequired) {
            return (status, [(axum::http::header::UPGRADE, "websocket")], body).into_response();
        }
        (status, body).into_response()
    }
}
