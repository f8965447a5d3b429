use crate::error::ShortenerError;
use crate::pool::ReplenishOutcome;
use crate::repository::UrlRecord;
use crate::shortcode::ShortCode;
use async_trait::async_trait;

type Result<T> = std::result::Result<T, ShortenerError>;

/// Outcome of a shorten request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortened {
    pub code: ShortCode,
    /// `true` when the URL was already mapped and no new code was allocated.
    pub existing: bool,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Allocates a code from the pool and persists `code -> original_url`.
    ///
    /// Fails with [`ShortenerError::PoolExhausted`] when no codes are left;
    /// the caller decides whether to replenish and retry.
    async fn shorten(&self, original_url: &str) -> Result<Shortened>;

    /// Refills the code pool up to its configured target size.
    ///
    /// A replenish already running in this process is waited for rather
    /// than skipped, so the pool has been refilled once this returns
    /// [`ReplenishOutcome::Completed`].
    async fn replenish(&self) -> Result<ReplenishOutcome>;

    /// Number of codes currently available for allocation.
    async fn pool_size(&self) -> Result<u64>;

    /// Most recently created mappings, newest first.
    async fn list_urls(&self, limit: usize) -> Result<Vec<(ShortCode, UrlRecord)>>;
}
