use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::catalog::FilterError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Account blocked: {0}")]
    Blocked(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a database failure, based on the constraint
/// the backend reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbFailure {
    UniqueViolation,
    ForeignKeyViolation,
    InvalidField,
    RowNotFound,
    Other,
}

impl DbFailure {
    pub fn classify(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbFailure::RowNotFound,
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => DbFailure::UniqueViolation,
                ErrorKind::ForeignKeyViolation => DbFailure::ForeignKeyViolation,
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    DbFailure::InvalidField
                }
                _ => DbFailure::Other,
            },
            _ => DbFailure::Other,
        }
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Database(err) => match DbFailure::classify(err) {
                DbFailure::UniqueViolation => (StatusCode::CONFLICT, "already_exists"),
                DbFailure::ForeignKeyViolation => (StatusCode::BAD_REQUEST, "missing_reference"),
                DbFailure::InvalidField => (StatusCode::BAD_REQUEST, "invalid_field"),
                DbFailure::RowNotFound => (StatusCode::NOT_FOUND, "not_found"),
                DbFailure::Other => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            AppError::Filter(_) => (StatusCode::BAD_REQUEST, "invalid_filter"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Blocked(_) => (StatusCode::FORBIDDEN, "account_blocked"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Text safe to show to the end user. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Database(err) => match DbFailure::classify(err) {
                DbFailure::UniqueViolation => "This record already exists.".to_string(),
                DbFailure::ForeignKeyViolation => {
                    "The record references something that does not exist.".to_string()
                }
                DbFailure::InvalidField => {
                    "A required field is missing or has an invalid value.".to_string()
                }
                DbFailure::RowNotFound => "The requested record was not found.".to_string(),
                DbFailure::Other => "Something went wrong. Please try again.".to_string(),
            },
            AppError::Filter(err) => err.to_string(),
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::BadRequest(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::Unauthorized => "Please sign in to continue.".to_string(),
            AppError::Blocked(reason) => format!("Your account has been blocked: {reason}"),
            AppError::Internal(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": code,
            "message": self.user_message(),
        }));

        (status, body).into_response()
    }
}
