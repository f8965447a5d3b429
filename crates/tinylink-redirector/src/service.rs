use std::sync::Arc;

use crate::batcher::{BatcherSettings, BatcherStats, RedirectBatcher};
use crate::redirector::Redirector;
use async_trait::async_trait;
use tinylink_core::{ClickRecorder, ReadRepository, ShortCode, UrlRecord};
use tracing::{debug, trace};

/// Service for handling URL redirects.
///
/// Every lookup goes through a [`RedirectBatcher`], so concurrent redirects
/// share one `get_many` round-trip to the mapping store.
pub struct RedirectorService<R> {
    batcher: RedirectBatcher<R>,
}

impl<R> RedirectorService<R>
where
    R: ReadRepository + ClickRecorder,
{
    /// Creates a new RedirectorService reading from `repository`.
    pub fn new(repository: Arc<R>, settings: BatcherSettings) -> Self {
        Self {
            batcher: RedirectBatcher::new(repository, settings),
        }
    }

    pub fn batcher(&self) -> &RedirectBatcher<R> {
        &self.batcher
    }

    /// Resolves a short code to its stored record.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(record))` - The mapping exists
    /// * `Ok(None)` - No mapping for `code`
    /// * `Err(e)` - The queue rejected the request or the batch lookup failed
    pub async fn resolve(&self, code: &ShortCode) -> crate::Result<Option<UrlRecord>> {
        Redirector::resolve(self, code).await
    }
}

#[async_trait]
impl<R> Redirector for RedirectorService<R>
where
    R: ReadRepository + ClickRecorder,
{
    async fn resolve(&self, code: &ShortCode) -> crate::Result<Option<UrlRecord>> {
        trace!(code = %code, "resolving short code");

        match self.batcher.enqueue(code.clone())?.await? {
            Some(record) => {
                debug!(code = %code, url = %record.original_url, "Resolved short code");
                Ok(Some(record))
            }
            None => {
                trace!(code = %code, "Short code not found");
                Ok(None)
            }
        }
    }

    fn stats(&self) -> BatcherStats {
        self.batcher.stats()
    }

    async fn shutdown(&self) {
        self.batcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RedirectorError;
    use std::time::Duration;
    use tinylink_core::Repository;
    use tinylink_storage::InMemoryRepository;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn settings() -> BatcherSettings {
        BatcherSettings::builder()
            .batch_size(10)
            .max_wait(Duration::from_millis(20))
            .build()
    }

    async fn setup_with_record(c: &ShortCode, url: &str) -> RedirectorService<InMemoryRepository> {
        let repo = InMemoryRepository::new();
        repo.insert(c, UrlRecord::new(url)).await.unwrap();
        RedirectorService::new(Arc::new(repo), settings())
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_existing_and_missing_codes() {
        let service = setup_with_record(&code("abc123"), "https://example.com").await;

        let (existing, unknown) = (code("abc123"), code("zzz999"));
        let (found, missing) = tokio::join!(service.resolve(&existing), service.resolve(&unknown));

        let found = found.unwrap().expect("record should exist");
        assert_eq!(found.original_url, "https://example.com");
        assert!(missing.unwrap().is_none());
        // Both lookups shared one batch.
        assert_eq!(service.stats().batches_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_after_shutdown_is_rejected() {
        let service = setup_with_record(&code("abc123"), "https://example.com").await;

        Redirector::shutdown(&service).await;

        let err = service.resolve(&code("abc123")).await.unwrap_err();
        assert!(matches!(err, RedirectorError::QueueClosed));
    }
}
