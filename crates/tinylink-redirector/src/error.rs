use thiserror::Error;
use tinylink_core::{CoreError, StorageError};

pub type Result<T> = std::result::Result<T, RedirectorError>;

/// Errors surfaced to a redirect caller.
///
/// `Clone` because one failed batch lookup is reported to every request
/// that was part of the batch.
#[derive(Debug, Clone, Error)]
pub enum RedirectorError {
    #[error("redirect queue is full ({pending} pending, capacity {capacity})")]
    QueueSaturated { pending: usize, capacity: usize },
    #[error("batched lookup failed: {0}")]
    BatchLookupFailed(#[source] StorageError),
    #[error("redirect queue is shut down")]
    QueueClosed,
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

impl From<CoreError> for RedirectorError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
        }
    }
}

impl RedirectorError {
    /// Whether the request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueSaturated { .. } | Self::BatchLookupFailed(_)
        )
    }
}
