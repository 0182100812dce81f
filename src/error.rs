use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{models::ErrorBody, repository::RepositoryError};

/// AppError
///
/// The client-facing error taxonomy. Handlers translate repository, publisher and
/// auth failures into one of these kinds; backend-native errors never reach the
/// response body. The message carried by each variant is the only text the client
/// sees, so it must stay minimal and safe.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => AppError::NotFound("Invalid ID".to_string()),
            RepositoryError::AlreadyExists => {
                AppError::AlreadyExists("Content already exists".to_string())
            }
            // The backend detail is logged by the caller, not echoed.
            RepositoryError::Backend(_) => {
                AppError::Internal("Content store unavailable".to_string())
            }
        }
    }
}
