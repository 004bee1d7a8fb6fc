use std::any::Any;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use shared::types::ErrorBody;
use crate::store::StoreError;

/// Every way a request can fail, mapped one-to-one onto a status code
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or incomplete input; never reaches the store
    #[error("{0}")]
    Validation(String),

    #[error("Hostname '{0}' not found")]
    NotFound(String),

    #[error("Database error")]
    Storage(#[from] StoreError),

    #[error("Internal server error")]
    Unexpected(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::Validation("Request must be JSON".to_string())
            }
            other => ApiError::Validation(format!("Malformed JSON body: {}", other.body_text())),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Storage(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string()))
            }
            ApiError::Unexpected(description) => {
                tracing::error!("Unexpected error: {}", description);
                (StatusCode::INTERNAL_SERVER_ERROR, Some(description.clone()))
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Turns a handler panic into a 500 instead of dropping the connection.
/// Only the panic message is exposed, cut to a short description.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };

    let description: String = message.chars().take(200).collect();
    ApiError::Unexpected(description).into_response()
}
