//! Error types shared by the catalog core and the service.
//!
//! Every failure the core can report maps onto one variant here. The HTTP
//! layer turns them into [`ApiResponse`] error envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// A catalog query or row materialization failed.
    #[error("Failed to fetch children of {owner}: {message}")]
    Fetch { owner: String, message: String },

    /// A named lookup after a successful population found nothing.
    #[error("{name} not found in {owner}")]
    ObjectNotFound { owner: String, name: String },

    /// An edit lacks what DDL generation needs.
    #[error("Cannot generate DDL: {0}")]
    Synthesis(String),

    /// A DDL statement failed on the server.
    #[error("Statement #{index} failed: {message}\n  SQL: {statement}")]
    Execution {
        index: usize,
        statement: String,
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Could not open a connection to the server.
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    /// A catalog query failed on the server.
    #[error("Database query error: {0}")]
    DatabaseQuery(String),

    /// Request validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identifier cannot be used in generated SQL.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Creates a fetch error for the given owner.
    pub fn fetch(owner: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Fetch {
            owner: owner.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error for `name` inside `owner`.
    pub fn not_found(owner: impl Into<String>, name: impl Into<String>) -> Self {
        AppError::ObjectNotFound {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Returns the stable error code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Fetch { .. } => "FETCH_ERROR",
            AppError::ObjectNotFound { .. } => "NOT_FOUND",
            AppError::Synthesis(_) => "SYNTHESIS_ERROR",
            AppError::Execution { .. } => "EXECUTION_ERROR",
            AppError::Cancelled => "CANCELLED",
            AppError::DatabaseConnection(_) => "DATABASE_CONNECTION_ERROR",
            AppError::DatabaseQuery(_) => "DATABASE_QUERY_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Synthesis(_) | AppError::Validation(_) | AppError::InvalidIdentifier(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Execution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            AppError::Fetch { .. }
            | AppError::DatabaseConnection(_)
            | AppError::DatabaseQuery(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true for errors callers may treat as "absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ObjectNotFound { .. })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "Request rejected");
        }

        let body = match &self {
            AppError::Execution {
                index, statement, ..
            } => ApiResponse::err_with_details(
                self.code(),
                self.to_string(),
                serde_json::json!({ "index": index, "statement": statement }),
            ),
            _ => ApiResponse::err(self.code(), self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_names_statement() {
        let err = AppError::Execution {
            index: 2,
            statement: "ALTER TABLE t DROP COLUMN c".into(),
            message: "column does not exist".into(),
        };
        let text = err.to_string();
        assert!(text.contains("#2"));
        assert!(text.contains("ALTER TABLE t DROP COLUMN c"));
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_not_found_is_soft() {
        let err = AppError::not_found("database postgres", "schema missing");
        assert!(err.is_not_found());
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(!AppError::Cancelled.is_not_found());
    }
}
