use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TabulaError {
    #[error("issue not found: {0}")]
    NotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("session is invalid or expired")]
    InvalidSession,
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Validation(String),
    #[error("User already exists!")]
    UserExists(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl TabulaError {
    pub fn code(&self) -> &'static str {
        match self {
            TabulaError::NotFound(_) => "not_found",
            TabulaError::UserNotFound(_) => "user_not_found",
            TabulaError::Unauthenticated(_) => "unauthenticated",
            TabulaError::InvalidCredentials => "invalid_credentials",
            TabulaError::InvalidSession => "invalid_session",
            TabulaError::PermissionDenied(_) => "permission_denied",
            TabulaError::Validation(_) => "validation",
            TabulaError::UserExists(_) => "user_exists",
            TabulaError::Config(_) => "config",
            TabulaError::Internal(_) => "internal",
        }
    }

    /// Rebuilds an error from a daemon response body.
    pub fn from_response(resp: ErrorResponse) -> Self {
        let ErrorResponse { error, code } = resp;
        match code.as_deref() {
            Some("not_found") => TabulaError::NotFound(
                error
                    .strip_prefix("issue not found: ")
                    .map(String::from)
                    .unwrap_or(error),
            ),
            Some("user_not_found") => TabulaError::UserNotFound(
                error
                    .strip_prefix("user not found: ")
                    .map(String::from)
                    .unwrap_or(error),
            ),
            Some("unauthenticated") => TabulaError::Unauthenticated(error),
            Some("invalid_credentials") => TabulaError::InvalidCredentials,
            Some("invalid_session") => TabulaError::InvalidSession,
            Some("permission_denied") => TabulaError::PermissionDenied(error),
            Some("validation") => TabulaError::Validation(error),
            Some("user_exists") => TabulaError::UserExists(error),
            Some("config") => TabulaError::Config(
                error
                    .strip_prefix("config error: ")
                    .map(String::from)
                    .unwrap_or(error),
            ),
            _ => TabulaError::Internal(
                error
                    .strip_prefix("internal error: ")
                    .map(String::from)
                    .unwrap_or(error),
            ),
        }
    }
}

impl From<rusqlite::Error> for TabulaError {
    fn from(err: rusqlite::Error) -> Self {
        TabulaError::Internal(format!("database error: {err}"))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&TabulaError> for ErrorResponse {
    fn from(err: &TabulaError) -> Self {
        ErrorResponse {
            error: err.to_string(),
            code: Some(err.code().to_string()),
        }
    }
}
