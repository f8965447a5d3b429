use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `None` when the code pool could not be queried.
    pub pool_size: Option<u64>,
}
