use crate::batcher::BatcherStats;
use crate::Result;
use async_trait::async_trait;
use tinylink_core::{ShortCode, UrlRecord};

#[async_trait]
pub trait Redirector: Send + Sync + 'static {
    /// Resolves a short code to its stored URL record.
    /// Returns `None` if the code does not exist.
    async fn resolve(&self, code: &ShortCode) -> Result<Option<UrlRecord>>;

    /// Snapshot of the batching queue counters.
    fn stats(&self) -> BatcherStats;

    /// Rejects new lookups and resolves every one still queued.
    async fn shutdown(&self);
}
