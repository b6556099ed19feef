//! Error types shared by the HTTP layer, services and stores
//!
//! Every failure a handler can produce is an [`AppError`]. Its
//! [`IntoResponse`] implementation shapes the uniform error envelope:
//!
//! ```json
//! { "success": false, "error": "Conflict", "message": "Product with this slug already exists" }
//! ```

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

/// A single failed field in a request body
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Failures raised by the storage layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

macro_rules! impl_store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Storage(e.to_string())
                }
            }
        )*
    };
}

impl_store_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Application error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No caller identity on a user-scoped route (401)
    #[error("User not authenticated")]
    NotAuthenticated,

    /// Admin route hit without the admin token (403)
    #[error("{0}")]
    Forbidden(String),

    /// Missing or invalid input (400)
    #[error("{0}")]
    Validation(String),

    /// Field-level validation failures (400)
    #[error("Validation failed")]
    InvalidFields(Vec<FieldError>),

    /// Target line, product or order does not exist (404)
    #[error("{0}")]
    NotFound(String),

    /// Duplicate slug or wishlist entry (409)
    #[error("{0}")]
    Conflict(String),

    /// A write completed but touched zero rows (403)
    #[error("{0}")]
    WriteRejected(String),

    /// Client exceeded its request budget (429)
    #[error("Too many requests, please try again later")]
    RateLimited,

    /// Underlying store failure, message passed through (500)
    #[error("{0}")]
    Upstream(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldError]>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::WriteRejected(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) | AppError::InvalidFields(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AppError::NotAuthenticated => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Validation(_) | AppError::InvalidFields(_) => "Validation failed",
            AppError::NotFound(_) => "Not found",
            AppError::Conflict(_) => "Conflict",
            AppError::WriteRejected(_) => "Write rejected",
            AppError::RateLimited => "Too many requests",
            AppError::Upstream(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Upstream(msg) = &self {
            error!(error = %msg, "upstream failure");
        }

        let details = match &self {
            AppError::InvalidFields(fields) => Some(fields.as_slice()),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.label(),
            message: self.to_string(),
            details,
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(e: PathRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(AppError::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::WriteRejected("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::InvalidFields(vec![]).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Upstream("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn store_errors_become_upstream() {
        let err: AppError = StoreError::Storage("disk full".into()).into();
        assert!(matches!(err, AppError::Upstream(ref m) if m.contains("disk full")));
    }
}
