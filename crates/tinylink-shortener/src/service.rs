use crate::allocator::CodeAllocator;
use crate::replenisher::Replenisher;
use async_trait::async_trait;
use std::sync::Arc;
use tinylink_core::{
    CodePool, ReplenishOutcome, Repository, ShortCode, Shortened, Shortener, ShortenerError,
    UrlRecord,
};
use tinylink_generator::Generator;
use tracing::debug;

/// Longest original URL accepted, matching the mapping store's column width.
pub const MAX_URL_LENGTH: usize = 2048;

/// Upper bound on the number of mappings one listing returns.
pub const MAX_LIST_LIMIT: usize = 1_000;

/// A concrete implementation of the `Shortener` trait.
///
/// Codes come from a [`CodeAllocator`], mappings are written to a
/// `Repository` that lives in a different database than the pool.
pub struct ShortenerService<R, P, G> {
    repository: Arc<R>,
    allocator: Arc<CodeAllocator<P, G>>,
    replenisher: Option<Arc<Replenisher>>,
}

impl<R: Repository, P: CodePool, G: Generator> ShortenerService<R, P, G> {
    pub fn new(repository: Arc<R>, allocator: Arc<CodeAllocator<P, G>>) -> Self {
        Self {
            repository,
            allocator,
            replenisher: None,
        }
    }

    /// Wakes `replenisher` whenever an allocation finds the pool empty.
    pub fn with_replenisher(mut self, replenisher: Arc<Replenisher>) -> Self {
        self.replenisher = Some(replenisher);
        self
    }

    pub fn allocator(&self) -> &Arc<CodeAllocator<P, G>> {
        &self.allocator
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        if url.len() > MAX_URL_LENGTH {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must be at most {} characters, got {}",
                MAX_URL_LENGTH,
                url.len()
            )));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        if scheme.is_empty() || rest.is_empty() || rest.starts_with('/') {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        if rest.chars().any(char::is_whitespace) {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must not contain whitespace: {}",
                url
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl<R: Repository, P: CodePool, G: Generator> Shortener for ShortenerService<R, P, G> {
    async fn shorten(&self, original_url: &str) -> Result<Shortened, ShortenerError> {
        Self::validate_url(original_url)?;

        if let Some(code) = self.repository.find_by_original_url(original_url).await? {
            debug!(code = %code, "URL already shortened, reusing code");
            return Ok(Shortened {
                code,
                existing: true,
            });
        }

        let code = match self.allocator.allocate().await {
            Ok(code) => code,
            Err(ShortenerError::PoolExhausted) => {
                if let Some(replenisher) = &self.replenisher {
                    replenisher.notify();
                }
                return Err(ShortenerError::PoolExhausted);
            }
            Err(e) => return Err(e),
        };

        self.repository
            .insert(&code, UrlRecord::new(original_url))
            .await?;
        debug!(code = %code, "stored new mapping");

        Ok(Shortened {
            code,
            existing: false,
        })
    }

    async fn replenish(&self) -> Result<ReplenishOutcome, ShortenerError> {
        // The background replenisher may already be refilling after the
        // exhaustion that led here; wait for it instead of skipping.
        Ok(self.allocator.replenish_or_wait().await?)
    }

    async fn pool_size(&self) -> Result<u64, ShortenerError> {
        Ok(self.allocator.pool_size().await?)
    }

    async fn list_urls(
        &self,
        limit: usize,
    ) -> Result<Vec<(ShortCode, UrlRecord)>, ShortenerError> {
        Ok(self.repository.list(limit.min(MAX_LIST_LIMIT)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorSettings;
    use crate::replenisher::ReplenisherSettings;
    use std::time::Duration;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tinylink_core::{PoolEntry, ReadRepository, StorageError};
    use tinylink_generator::SequentialGenerator;
    use tinylink_storage::{InMemoryCodePool, InMemoryRepository};

    type TestService = ShortenerService<InMemoryRepository, InMemoryCodePool, SequentialGenerator>;

    fn allocator(target: u64) -> Arc<CodeAllocator<InMemoryCodePool, SequentialGenerator>> {
        Arc::new(CodeAllocator::new(
            InMemoryCodePool::new(),
            SequentialGenerator::with_prefix("wh"),
            AllocatorSettings::builder()
                .pool_target_size(target)
                .insert_batch_size(10)
                .build(),
        ))
    }

    async fn test_service(target: u64) -> (TestService, Arc<InMemoryRepository>) {
        let repository = Arc::new(InMemoryRepository::new());
        let allocator = allocator(target);
        allocator.replenish().await.unwrap();
        (
            ShortenerService::new(Arc::clone(&repository), allocator),
            repository,
        )
    }

    #[tokio::test]
    async fn shorten_allocates_from_pool_and_stores_mapping() {
        let (service, repository) = test_service(10).await;

        let shortened = service.shorten("https://example.com").await.unwrap();
        assert_eq!(shortened.code.as_str(), "wh000000");
        assert!(!shortened.existing);

        let record = repository.get(&shortened.code).await.unwrap().unwrap();
        assert_eq!(record.original_url, "https://example.com");
        assert_eq!(service.pool_size().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn shorten_reuses_code_for_known_url() {
        let (service, _) = test_service(10).await;

        let first = service.shorten("https://example.com").await.unwrap();
        let second = service.shorten("https://example.com").await.unwrap();

        assert_eq!(first.code, second.code);
        assert!(second.existing);
        // No pool entry was consumed for the repeat.
        assert_eq!(service.pool_size().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn shorten_with_invalid_url_fails() {
        let (service, _) = test_service(10).await;

        for url in [
            "",
            "not-a-valid-url",
            "ftp://example.com",
            "https://",
            "https:///path",
            "https://exa mple.com",
        ] {
            let err = service.shorten(url).await.unwrap_err();
            assert!(matches!(err, ShortenerError::InvalidUrl(_)), "{url}");
        }

        let too_long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        let err = service.shorten(&too_long).await.unwrap_err();
        assert!(matches!(err, ShortenerError::InvalidUrl(_)));

        // Rejected URLs never consume a code.
        assert_eq!(service.pool_size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn shorten_fails_when_pool_is_exhausted() {
        let (service, _) = test_service(1).await;

        service.shorten("https://one.example").await.unwrap();
        let err = service.shorten("https://two.example").await.unwrap_err();
        assert!(matches!(err, ShortenerError::PoolExhausted));

        assert_eq!(service.replenish().await.unwrap().inserted(), 1);
        let shortened = service.shorten("https://two.example").await.unwrap();
        assert_eq!(shortened.code, ShortCode::new_unchecked("wh000001"));
    }

    #[tokio::test]
    async fn list_urls_returns_newest_first_and_is_capped() {
        let (service, _) = test_service(10).await;

        for i in 0..3 {
            service.shorten(&format!("https://{i}.example")).await.unwrap();
        }

        let listed = service.list_urls(2).await.unwrap();
        let urls: Vec<_> = listed.iter().map(|(_, r)| r.original_url.as_str()).collect();
        assert_eq!(urls, ["https://2.example", "https://1.example"]);
        assert_eq!(listed[0].0.as_str(), "wh000002");

        assert_eq!(service.list_urls(usize::MAX).await.unwrap().len(), 3);
    }

    /// Pool whose bulk inserts take a while, so a replenish stays in flight.
    struct SlowPool {
        inner: InMemoryCodePool,
        delay: Duration,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl CodePool for SlowPool {
        type Lease = <InMemoryCodePool as CodePool>::Lease;

        async fn size(&self) -> Result<u64, StorageError> {
            self.inner.size().await
        }

        async fn insert_codes(&self, codes: &[ShortCode]) -> Result<u64, StorageError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.insert_codes(codes).await
        }

        async fn take(&self) -> Result<Option<PoolEntry>, StorageError> {
            self.inner.take().await
        }

        async fn try_lock_replenish(&self) -> Result<Option<Self::Lease>, StorageError> {
            self.inner.try_lock_replenish().await
        }

        async fn unlock_replenish(&self, lease: Self::Lease) -> Result<(), StorageError> {
            self.inner.unlock_replenish(lease).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replenish_waits_for_background_run_before_retry() {
        let allocator = Arc::new(CodeAllocator::new(
            SlowPool {
                inner: InMemoryCodePool::new(),
                delay: Duration::from_millis(20),
                inserts: AtomicUsize::new(0),
            },
            SequentialGenerator::with_prefix("wh"),
            AllocatorSettings::builder()
                .pool_target_size(2)
                .insert_batch_size(10)
                .build(),
        ));
        let replenisher = Arc::new(Replenisher::spawn(
            Arc::clone(&allocator),
            ReplenisherSettings::default(),
        ));
        let service = ShortenerService::new(Arc::new(InMemoryRepository::new()), Arc::clone(&allocator))
            .with_replenisher(Arc::clone(&replenisher));
        tokio::time::sleep(Duration::from_millis(50)).await;

        service.shorten("https://one.example").await.unwrap();
        service.shorten("https://two.example").await.unwrap();
        let err = service.shorten("https://three.example").await.unwrap_err();
        assert!(matches!(err, ShortenerError::PoolExhausted));

        // Let the woken background run get its insert in flight.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(allocator.pool().inserts.load(Ordering::SeqCst), 2);

        let outcome = service.replenish().await.unwrap();
        assert!(matches!(outcome, ReplenishOutcome::Completed { .. }));
        assert_eq!(service.pool_size().await.unwrap(), 2);
        service.shorten("https://three.example").await.unwrap();

        replenisher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wakes_the_replenisher() {
        let repository = Arc::new(InMemoryRepository::new());
        let allocator = allocator(2);
        let replenisher = Arc::new(Replenisher::spawn(
            Arc::clone(&allocator),
            ReplenisherSettings::default(),
        ));
        let service = ShortenerService::new(repository, allocator)
            .with_replenisher(Arc::clone(&replenisher));
        tokio::time::sleep(Duration::from_millis(10)).await;

        service.shorten("https://one.example").await.unwrap();
        service.shorten("https://two.example").await.unwrap();
        let err = service.shorten("https://three.example").await.unwrap_err();
        assert!(matches!(err, ShortenerError::PoolExhausted));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.pool_size().await.unwrap(), 2);
        service.shorten("https://three.example").await.unwrap();

        replenisher.shutdown().await;
    }
}
