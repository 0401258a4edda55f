use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::models::proctoring::ViolationType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Assessment submitted due to security violation: {0}")]
    SecurityViolation(ViolationType),

    #[error("Section locked: {0}")]
    SectionLocked(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Scoring service failure: {0}")]
    ScoringOracle(String),

    #[error("Failed to persist results: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code returned to the client next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::BadRequest(_) | Error::Validation(_) | Error::Json(_) => "bad_request",
            Error::NotFound(_) => "not_found",
            Error::PermissionDenied(_) => "permission_denied",
            Error::SessionInvalid(_) => "session_invalid",
            Error::SessionExpired(_) => "session_expired",
            Error::SecurityViolation(_) => "security_violation",
            Error::SectionLocked(_) => "section_locked",
            Error::Conflict(_) => "conflict",
            Error::ScoringOracle(_) => "scoring_failure",
            Error::Persistence(_) => "persistence_failure",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let (status, error_message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::PermissionDenied(msg) => (StatusCode::FORBIDDEN, msg),
            Error::SessionInvalid(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::SessionExpired(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::SecurityViolation(v) => (StatusCode::FORBIDDEN, v.termination_message().to_string()),
            Error::SectionLocked(msg) => (StatusCode::CONFLICT, msg),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Error::ScoringOracle(msg) => (StatusCode::BAD_GATEWAY, msg),
            Error::Persistence(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Error::Json(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Reqwest(err) => (StatusCode::BAD_GATEWAY, format!("External service error: {}", err)),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Error::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Error::Anyhow(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
            ),
        };

        let body = Json(json!({ "error": code, "message": error_message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
