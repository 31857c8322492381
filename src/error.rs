//! Application error kinds and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::envelope::JsonResponse;

pub type AppResult<T> = Result<T, AppError>;

/// Message returned for every authentication failure, whatever the cause.
pub const GENERIC_CREDENTIAL_MESSAGE: &str = "invalid credentials";

const DUPLICATE_RECORD_MESSAGE: &str = "record already exists";

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or unacceptable request input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bad login, or a missing/invalid/expired/revoked token. The payload is the
    /// server-side reason and never reaches the client.
    #[error("credential error: {0}")]
    Credential(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// The OS entropy source failed; token generation must abort.
    #[error("randomness error: {0}")]
    Randomness(String),

    /// A stored password hash could not be parsed.
    #[error("format error: {0}")]
    Format(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Credential(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Randomness(_) | AppError::Format(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text safe to show to the caller.
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(m) | AppError::Conflict(m) | AppError::NotFound(m) => m.clone(),
            AppError::Credential(_) => GENERIC_CREDENTIAL_MESSAGE.to_string(),
            AppError::Persistence(_) => "storage unavailable, try again".to_string(),
            AppError::Randomness(_) | AppError::Format(_) | AppError::Internal(_) => {
                "internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        }
        let body = Json(JsonResponse::<()>::failure(self.public_message()));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                warn!(constraint = db.constraint(), detail = db.message(), "unique violation");
                AppError::Conflict(DUPLICATE_RECORD_MESSAGE.into())
            }
            _ => AppError::Persistence(e.to_string()),
        }
    }
}
