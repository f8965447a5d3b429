use tinylink_core::{CodePool, ReplenishOutcome, ShortCode, ShortenerError, StorageError};
use tokio::sync::Mutex;
use tinylink_generator::Generator;
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;

const DEFAULT_POOL_TARGET_SIZE: u64 = 10_000;
const DEFAULT_INSERT_BATCH_SIZE: usize = 1_000;

/// Consecutive insert batches that add nothing before a run gives up.
const MAX_EMPTY_BATCHES: u32 = 3;

#[derive(Debug, Clone, TypedBuilder)]
pub struct AllocatorSettings {
    /// Number of unused codes a replenish run fills the pool up to.
    #[builder(default = DEFAULT_POOL_TARGET_SIZE)]
    pub pool_target_size: u64,
    /// Codes generated and inserted per bulk insert.
    #[builder(default = DEFAULT_INSERT_BATCH_SIZE)]
    pub insert_batch_size: usize,
    /// Below this size the background replenisher refills the pool.
    #[builder(default = pool_target_size / 10)]
    pub low_watermark: u64,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Hands out pre-generated short codes and refills the pool they come from.
///
/// Allocation never generates codes: it claims an existing pool entry, so the
/// write path has no generate-and-retry loop. Replenishment is the only place
/// codes are generated, and duplicates it produces are dropped by the pool.
#[derive(Debug)]
pub struct CodeAllocator<P, G> {
    pool: P,
    generator: G,
    settings: AllocatorSettings,
    /// Held for the whole of a replenish run started by this allocator.
    running: Mutex<()>,
}

impl<P: CodePool, G: Generator> CodeAllocator<P, G> {
    pub fn new(pool: P, generator: G, settings: AllocatorSettings) -> Self {
        Self {
            pool,
            generator,
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    /// Claims exactly one code from the pool.
    ///
    /// Fails with [`ShortenerError::PoolExhausted`] when the pool is empty;
    /// refilling is left to the caller.
    pub async fn allocate(&self) -> Result<ShortCode, ShortenerError> {
        match self.pool.take().await? {
            Some(entry) => {
                trace!(code = %entry.code, sequence = entry.sequence, "allocated code");
                Ok(entry.code)
            }
            None => {
                warn!("code pool exhausted");
                Err(ShortenerError::PoolExhausted)
            }
        }
    }

    /// Number of unused codes left in the pool.
    pub async fn pool_size(&self) -> Result<u64, StorageError> {
        self.pool.size().await
    }

    /// Whether the pool has dropped below the configured low watermark.
    pub async fn below_low_watermark(&self) -> Result<bool, StorageError> {
        Ok(self.pool.size().await? < self.settings.low_watermark)
    }

    /// Fills the pool up to `pool_target_size`.
    ///
    /// Only one replenisher runs at a time across every process sharing the
    /// pool; the others return [`ReplenishOutcome::AlreadyRunning`] at once.
    /// Errors are only returned when the lock itself cannot be queried.
    pub async fn replenish(&self) -> Result<ReplenishOutcome, StorageError> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("replenish already running in this process");
            return Ok(ReplenishOutcome::AlreadyRunning);
        };
        self.replenish_locked().await
    }

    /// Like [`replenish`](Self::replenish), but first waits for a run
    /// already in progress on this allocator, then runs again.
    ///
    /// The second run only tops up what was consumed meanwhile. A run held
    /// by another process still yields [`ReplenishOutcome::AlreadyRunning`].
    pub async fn replenish_or_wait(&self) -> Result<ReplenishOutcome, StorageError> {
        let _running = self.running.lock().await;
        self.replenish_locked().await
    }

    async fn replenish_locked(&self) -> Result<ReplenishOutcome, StorageError> {
        let Some(lease) = self.pool.try_lock_replenish().await? else {
            debug!("replenish already running");
            return Ok(ReplenishOutcome::AlreadyRunning);
        };

        let outcome = self.fill().await;

        if let Err(e) = self.pool.unlock_replenish(lease).await {
            warn!(error = %e, "failed to release replenish lock");
        }

        Ok(outcome)
    }

    async fn fill(&self) -> ReplenishOutcome {
        let target = self.settings.pool_target_size;
        let batch_size = self.settings.insert_batch_size.max(1) as u64;

        let mut pool_size = match self.pool.size().await {
            Ok(size) => size,
            Err(error) => return interrupted(0, error),
        };
        let start_size = pool_size;
        let mut inserted = 0;
        let mut duplicates = 0;
        let mut empty_batches = 0;

        while pool_size < target {
            let count = (target - pool_size).min(batch_size);
            let codes = self.generator.generate_batch(count as usize);

            let added = match self.pool.insert_codes(&codes).await {
                Ok(added) => added,
                Err(error) => return interrupted(inserted, error),
            };

            inserted += added;
            pool_size += added;
            duplicates += count - added.min(count);

            if added == 0 {
                empty_batches += 1;
                if empty_batches >= MAX_EMPTY_BATCHES {
                    warn!(
                        pool_size,
                        target, "no fresh codes left in the key space, stopping replenish"
                    );
                    break;
                }
            } else {
                empty_batches = 0;
            }
        }

        if inserted > 0 {
            info!(inserted, duplicates, start_size, pool_size, "replenished code pool");
        } else {
            debug!(pool_size, "code pool already at target");
        }

        ReplenishOutcome::Completed {
            inserted,
            pool_size,
        }
    }
}

fn interrupted(inserted: u64, error: StorageError) -> ReplenishOutcome {
    warn!(inserted, error = %error, "replenish interrupted by storage error");
    ReplenishOutcome::Interrupted { inserted, error }
}
