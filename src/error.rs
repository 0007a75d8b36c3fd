use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Failure classes surfaced by the chat core. Storage and validation errors
/// must be caught before anything is broadcast; see `rooms::msg::send_msg`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("backend unreachable: {0}")]
    Connectivity(String),

    #[error("not allowed: {0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("invalid message: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
