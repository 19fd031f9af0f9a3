// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::exam::ExamError;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (e.g., session terminated by proctoring)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., module out of order, session already active)
    Conflict(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InternalServerError(msg) => write!(f, "internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            AppError::AuthError(msg) => write!(f, "unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            AppError::NotFound(msg) => write!(f, "not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "conflict: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Maps domain errors onto HTTP statuses.
impl From<ExamError> for AppError {
    fn from(err: ExamError) -> Self {
        let msg = err.to_string();
        match err {
            ExamError::InvalidCode(_) => AppError::NotFound(msg),
            ExamError::AlreadyActive(_)
            | ExamError::ModuleOutOfOrder { .. }
            | ExamError::SessionClosed(_) => AppError::Conflict(msg),
            ExamError::IncompleteResults(_)
            | ExamError::MalformedScoreData(_)
            | ExamError::UnknownModule(_) => AppError::BadRequest(msg),
            ExamError::TerminationTriggered { .. } => AppError::Forbidden(msg),
            ExamError::PersistenceFailure(_) => AppError::InternalServerError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::{ExamStatus, ModuleId};

    fn status_of(err: ExamError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn exam_errors_map_to_statuses() {
        assert_eq!(status_of(ExamError::InvalidCode("X".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ExamError::SessionClosed(ExamStatus::Terminated)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ExamError::IncompleteResults(vec![ModuleId::Writing])),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ExamError::TerminationTriggered { violations: 3 }),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn internal_errors_are_masked() {
        let err = ExamError::PersistenceFailure("connection reset".into());
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
