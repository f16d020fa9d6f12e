use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;
use crate::task::store::StoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("Task store error: {0}")]
    Store(#[from] StoreError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized(message) => {
                error_response(StatusCode::UNAUTHORIZED, message, "authentication_error", None)
                    .into_response()
            }
            Self::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, message, "invalid_request_error", None)
                    .into_response()
            }
            Self::NotFound(message) => {
                error_response(StatusCode::NOT_FOUND, message, "invalid_request_error", None)
                    .into_response()
            }
            Self::Task(error) => error.into_response(),
            Self::Store(error) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
                "server_error",
                None,
            )
            .into_response(),
            Self::Storage(error) => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                error.to_string(),
                "server_error",
                None,
            )
            .into_response(),
            Self::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, message, "server_error", None)
                    .into_response()
            }
        }
    }
}

/// Machine-readable class of a task pipeline failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskErrorKind {
    /// Malformed or unsupported canonical request, rejected before any network call.
    Validation,
    /// Error object embedded in a vendor response.
    Vendor,
    /// Network, timeout, proxy or cancellation failure.
    Transport,
    /// Unexpected vendor response shape.
    Parse,
}

impl TaskErrorKind {
    pub fn error_type(self) -> &'static str {
        match self {
            Self::Validation => "invalid_request_error",
            Self::Vendor | Self::Transport => "upstream_error",
            Self::Parse => "server_error",
        }
    }
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub code: String,
    pub message: String,
    pub status: StatusCode,
}

impl TaskError {
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Validation,
            code: code.into(),
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// Vendors sometimes embed errors in 2xx bodies; those surface as 502.
    pub fn vendor(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        let status = if status.is_success() {
            StatusCode::BAD_GATEWAY
        } else {
            status
        };
        Self {
            kind: TaskErrorKind::Vendor,
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Transport,
            code: code.into(),
            message: message.into(),
            status: StatusCode::BAD_GATEWAY,
        }
    }

    pub fn parse(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TaskErrorKind::Parse,
            code: code.into(),
            message: message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == TaskErrorKind::Transport
    }
}

impl From<reqwest::Error> for TaskError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            "request_timeout"
        } else {
            "do_request_failed"
        };
        Self::transport(code, error.to_string())
    }
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        error_response(
            self.status,
            self.message,
            self.kind.error_type(),
            Some(self.code),
        )
        .into_response()
    }
}

pub(crate) fn error_response(
    status: StatusCode,
    message: String,
    error_type: &'static str,
    code: Option<String>,
) -> (StatusCode, Json<OpenAiErrorResponse>) {
    (
        status,
        Json(OpenAiErrorResponse {
            error: OpenAiError {
                message,
                error_type: error_type.to_string(),
                param: None,
                code,
            },
        }),
    )
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Serialize)]
struct OpenAiError {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    param: Option<String>,
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_errors_in_success_bodies_become_bad_gateway() {
        let error = TaskError::vendor("doubao_api_error", "[InvalidParameter] bad", StatusCode::OK);
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(error.kind, TaskErrorKind::Vendor);

        let error = TaskError::vendor("doubao_api_error", "quota", StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(TaskError::transport("request_cancelled", "cancelled").is_retryable());
        assert!(!TaskError::parse("invalid_response", "empty id").is_retryable());
        assert!(!TaskError::validation("invalid_request", "no model").is_retryable());
        assert!(!TaskError::vendor("x", "y", StatusCode::BAD_REQUEST).is_retryable());
    }

    #[test]
    fn task_errors_render_with_type_and_code() {
        let response = TaskError::parse("invalid_response", "task_id is empty").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response =
            GatewayError::NotFound("task not found".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
