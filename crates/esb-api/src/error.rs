use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use esb_common::StoreError;

/// Handler error rendered as `{ "error", "message" }`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: "NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            error: "CONFLICT",
            message: message.into(),
        }
    }

    pub fn unknown_processor(name: &str) -> Self {
        Self::not_found(format!("Message processor '{}' not found", name))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let (status, error) = match &err {
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            StoreError::Full { .. } => (StatusCode::SERVICE_UNAVAILABLE, "STORE_FULL"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
        };
        Self {
            status,
            error,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = self.error, message = %self.message, "Management request failed");
        }
        let body = ErrorBody {
            error: self.error,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
