use crate::model::ErrorResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tinylink_core::{CoreError, ShortenerError, StorageError};
use tinylink_redirector::RedirectorError;
use tracing::error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Shortener(#[from] ShortenerError),
    #[error(transparent)]
    Redirector(#[from] RedirectorError),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("short code not found: {0}")]
    NotFound(String),
}

impl From<CoreError> for AppError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
        }
    }
}

fn storage_status(error: &StorageError) -> StatusCode {
    match error {
        StorageError::Unavailable(_) | StorageError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Shortener(e) => match e {
                ShortenerError::InvalidUrl(_) | ShortenerError::InvalidShortCode(_) => {
                    StatusCode::BAD_REQUEST
                }
                ShortenerError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
                ShortenerError::Storage(e) => storage_status(e),
            },
            AppError::Redirector(e) => match e {
                RedirectorError::InvalidShortCode(_) => StatusCode::BAD_REQUEST,
                RedirectorError::QueueSaturated { .. }
                | RedirectorError::QueueClosed
                | RedirectorError::BatchLookupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            AppError::InvalidShortCode(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = %status, error = %self, "request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
