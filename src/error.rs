use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Record not found")]
    NotFound,

    #[error("Record already exists")]
    Duplicate,

    #[error("Slot is no longer available")]
    SlotTaken,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stored data is invalid: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// User-presentable validation message. `field` is `None` for form-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn field(field: &str, message: &str) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn form(message: &str) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Too late to cancel")]
    TooLate,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(errors) => (StatusCode::BAD_REQUEST, json!({ "errors": errors })),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": what }),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized" }),
            ),
            AppError::TooLate => (StatusCode::CONFLICT, json!({ "error": "too_late" })),
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            AppError::Backend(BackendError::NotFound) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found" }),
            ),
            AppError::Backend(BackendError::Duplicate) => (
                StatusCode::CONFLICT,
                json!({ "error": "Resource already exists" }),
            ),
            AppError::Backend(BackendError::InvalidInput(message)) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            AppError::Backend(err) => {
                error!(?err, "Storage failure while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "An internal server error occurred" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
