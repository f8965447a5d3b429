use crate::error::StorageError;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A stored URL record in the repository.
///
/// The `original_url` of a record never changes once written; only the
/// click counter is mutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The original URL that was shortened.
    pub original_url: String,
    /// When the mapping was created.
    pub created_at: Timestamp,
    /// How many redirects were served for this code.
    pub clicks: u64,
}

impl UrlRecord {
    /// A fresh record with a zero click counter, stamped with the current time.
    pub fn new(original_url: impl Into<String>) -> Self {
        Self {
            original_url: original_url.into(),
            created_at: Timestamp::now(),
            clicks: 0,
        }
    }
}

/// A read-only view of a repository.
///
/// This trait provides only the read operations from [`Repository`],
/// allowing services like the redirector to have read-only access.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the URL record for a given short code.
    /// Returns `None` if the code does not exist.
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Retrieves the records for many codes in one round-trip.
    ///
    /// Codes without a mapping are simply absent from the returned map.
    async fn get_many(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, UrlRecord>> {
        let mut found = HashMap::with_capacity(codes.len());
        for code in codes {
            if let Some(record) = self.get(code).await? {
                found.insert(code.clone(), record);
            }
        }
        Ok(found)
    }

    /// Checks whether a short code already exists in the repository.
    async fn exists(&self, code: &ShortCode) -> Result<bool>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// Inserts a new URL record. Returns `Err(Conflict)` if the code already exists.
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()>;

    /// Finds the code already mapped to `original_url`, if any.
    async fn find_by_original_url(&self, original_url: &str) -> Result<Option<ShortCode>>;

    /// Returns at most `limit` mappings, most recently created first.
    async fn list(&self, limit: usize) -> Result<Vec<(ShortCode, UrlRecord)>>;
}

/// Post-redirect bookkeeping.
#[async_trait]
pub trait ClickRecorder: Send + Sync + 'static {
    /// Increments the click counter of `code`.
    /// Returns `false` if the code has no mapping.
    async fn record_click(&self, code: &ShortCode) -> Result<bool>;
}
