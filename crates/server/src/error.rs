use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use events::ErrorCode;
use orchestrator::{OrchestratorError, RunnerState};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    /// The runner is not accepting jobs.
    Unavailable(RunnerState),
    Internal(String),
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    error: String,
    code: ErrorCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                ErrorCode::ValidationError,
                msg,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "not_found",
                ErrorCode::UnknownError,
                msg,
            ),
            AppError::Unavailable(state) => (
                StatusCode::TOO_MANY_REQUESTS,
                "busy",
                ErrorCode::UnknownError,
                format!("Worker is {}", state),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    ErrorCode::UnknownError,
                    msg,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            code,
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(msg) => AppError::Validation(msg),
            OrchestratorError::Busy => AppError::Unavailable(RunnerState::Busy),
            OrchestratorError::Retired => AppError::Unavailable(RunnerState::Retired),
            OrchestratorError::Database(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<db::DbError> for AppError {
    fn from(err: db::DbError) -> Self {
        match err {
            db::DbError::SessionNotFound(id) => {
                AppError::NotFound(format!("Session not found: {}", id))
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                AppError::Internal("Database error occurred".to_string())
            }
        }
    }
}
