use crate::error::StorageError;
use crate::shortcode::ShortCode;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, StorageError>;

/// An unused, pre-generated short code waiting in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    /// Monotonically increasing insertion sequence.
    pub sequence: u64,
    pub code: ShortCode,
}

/// Result of one replenish run.
#[derive(Debug, Clone)]
pub enum ReplenishOutcome {
    /// The pool reached its target, or the key space ran out of fresh codes.
    Completed { inserted: u64, pool_size: u64 },
    /// Another replenisher holds the lock; nothing was done.
    AlreadyRunning,
    /// A storage error stopped the run after `inserted` codes were added.
    Interrupted { inserted: u64, error: StorageError },
}

impl ReplenishOutcome {
    /// Codes added to the pool by this run.
    pub fn inserted(&self) -> u64 {
        match self {
            Self::Completed { inserted, .. } | Self::Interrupted { inserted, .. } => *inserted,
            Self::AlreadyRunning => 0,
        }
    }
}

/// Durable set of pre-generated short codes.
///
/// Implementations must guarantee that [`take`](CodePool::take) hands every
/// entry to exactly one caller, without making one caller wait for another
/// caller's in-flight `take`.
#[async_trait]
pub trait CodePool: Send + Sync + 'static {
    /// Proof that the caller holds the pool-wide replenish lock.
    type Lease: Send + 'static;

    /// Number of codes still available for allocation.
    async fn size(&self) -> Result<u64>;

    /// Bulk-inserts `codes`, silently skipping any code the pool has already
    /// seen (including codes that were handed out before).
    ///
    /// Returns how many codes were actually added.
    async fn insert_codes(&self, codes: &[ShortCode]) -> Result<u64>;

    /// Atomically removes one entry and returns it, or `None` if the pool is empty.
    async fn take(&self) -> Result<Option<PoolEntry>>;

    /// Tries to acquire the replenish lock without waiting.
    ///
    /// Returns `None` when another replenisher (possibly in another process)
    /// currently holds it.
    async fn try_lock_replenish(&self) -> Result<Option<Self::Lease>>;

    /// Releases a lease obtained from [`try_lock_replenish`](CodePool::try_lock_replenish).
    async fn unlock_replenish(&self, lease: Self::Lease) -> Result<()>;
}
