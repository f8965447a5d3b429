use serde::{Deserialize, Serialize};
use tinylink_core::ReplenishOutcome;

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplenishResponse {
    /// `completed`, `already_running` or `interrupted`.
    pub status: String,
    pub inserted: u64,
    pub pool_size: Option<u64>,
    pub error: Option<String>,
}

impl From<ReplenishOutcome> for ReplenishResponse {
    fn from(outcome: ReplenishOutcome) -> Self {
        match outcome {
            ReplenishOutcome::Completed {
                inserted,
                pool_size,
            } => Self {
                status: "completed".to_string(),
                inserted,
                pool_size: Some(pool_size),
                error: None,
            },
            ReplenishOutcome::AlreadyRunning => Self {
                status: "already_running".to_string(),
                inserted: 0,
                pool_size: None,
                error: None,
            },
            ReplenishOutcome::Interrupted { inserted, error } => Self {
                status: "interrupted".to_string(),
                inserted,
                pool_size: None,
                error: Some(error.to_string()),
            },
        }
    }
}
