use crate::error::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use jiff::Timestamp;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tinylink_core::{
    ClickRecorder, CodePool, PoolEntry, ReadRepository, Repository, ShortCode, StorageError,
    UrlRecord,
};
use tokio::sync::OwnedMutexGuard;

/// In-memory storage entry for a URL mapping.
#[derive(Debug, Clone)]
struct Entry {
    /// Insertion order, used to list the newest mappings first.
    sequence: u64,
    original_url: String,
    created_at: Timestamp,
    clicks: u64,
}

impl Entry {
    fn to_record(&self) -> UrlRecord {
        UrlRecord {
            original_url: self.original_url.clone(),
            created_at: self.created_at,
            clicks: self.clicks,
        }
    }
}

/// In-memory implementation of the Repository trait using DashMap.
///
/// DashMap provides better concurrency than RwLock<HashMap> because it
/// uses sharded locks, allowing concurrent reads and writes to different
/// buckets without blocking.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    storage: DashMap<ShortCode, Entry>,
    by_url: DashMap<String, ShortCode>,
    next_sequence: AtomicU64,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory repository with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: DashMap::with_capacity(capacity),
            by_url: DashMap::with_capacity(capacity),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>> {
        Ok(self.storage.get(code).map(|entry| entry.to_record()))
    }

    async fn get_many(&self, codes: &[ShortCode]) -> Result<HashMap<ShortCode, UrlRecord>> {
        Ok(codes
            .iter()
            .filter_map(|code| {
                self.storage
                    .get(code)
                    .map(|entry| (code.clone(), entry.to_record()))
            })
            .collect())
    }

    async fn exists(&self, code: &ShortCode) -> Result<bool> {
        Ok(self.storage.contains_key(code))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert(&self, code: &ShortCode, record: UrlRecord) -> Result<()> {
        // Check-and-insert under the shard lock: the code must not be taken.
        match self.storage.entry(code.clone()) {
            MapEntry::Occupied(_) => Err(StorageError::Conflict(code.to_string())),
            MapEntry::Vacant(slot) => {
                self.by_url
                    .entry(record.original_url.clone())
                    .or_insert_with(|| code.clone());
                slot.insert(Entry {
                    sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                    original_url: record.original_url,
                    created_at: record.created_at,
                    clicks: record.clicks,
                });
                Ok(())
            }
        }
    }

    async fn find_by_original_url(&self, original_url: &str) -> Result<Option<ShortCode>> {
        Ok(self.by_url.get(original_url).map(|code| code.clone()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<(ShortCode, UrlRecord)>> {
        let mut entries: Vec<(u64, ShortCode, UrlRecord)> = self
            .storage
            .iter()
            .map(|entry| (entry.sequence, entry.key().clone(), entry.to_record()))
            .collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(_, code, record)| (code, record))
            .collect())
    }
}

#[async_trait]
impl ClickRecorder for InMemoryRepository {
    async fn record_click(&self, code: &ShortCode) -> Result<bool> {
        match self.storage.get_mut(code) {
            Some(mut entry) => {
                entry.clicks += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    available: VecDeque<PoolEntry>,
    /// Every code ever inserted, including the ones already taken.
    seen: HashSet<ShortCode>,
    next_sequence: u64,
}

/// In-memory code pool.
///
/// A single mutex serialises `take`, which is enough for one process; the
/// SQL pools give the same exactly-once guarantee across processes.
#[derive(Debug, Default)]
pub struct InMemoryCodePool {
    state: Mutex<PoolState>,
    replenish_lock: Arc<tokio::sync::Mutex<()>>,
}

impl InMemoryCodePool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodePool for InMemoryCodePool {
    type Lease = OwnedMutexGuard<()>;

    async fn size(&self) -> Result<u64> {
        Ok(self.state.lock().available.len() as u64)
    }

    async fn insert_codes(&self, codes: &[ShortCode]) -> Result<u64> {
        let mut state = self.state.lock();
        let mut inserted = 0;

        for code in codes {
            if !state.seen.insert(code.clone()) {
                continue;
            }
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            state.available.push_back(PoolEntry {
                sequence,
                code: code.clone(),
            });
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn take(&self) -> Result<Option<PoolEntry>> {
        Ok(self.state.lock().available.pop_front())
    }

    async fn try_lock_replenish(&self) -> Result<Option<Self::Lease>> {
        Ok(Arc::clone(&self.replenish_lock).try_lock_owned().ok())
    }

    async fn unlock_replenish(&self, lease: Self::Lease) -> Result<()> {
        drop(lease);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn record(url: &str) -> UrlRecord {
        UrlRecord::new(url)
    }

    #[tokio::test]
    async fn save_and_get() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("abc123"), record("https://example.com"))
            .await
            .unwrap();

        let result = repo.get(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(result.original_url, "https://example.com");
        assert_eq!(result.clicks, 0);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();

        let result = repo.get(&code("nope")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn insert_conflict_keeps_original_target() {
        let repo = InMemoryRepository::new();

        repo.insert(&code("abc123"), record("https://example.com"))
            .await
            .unwrap();

        let err = repo
            .insert(&code("abc123"), record("https://other.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict(_)));
        let result = repo.get(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(result.original_url, "https://example.com");
    }

    #[tokio::test]
    async fn get_many_skips_missing_codes() {
        let repo = InMemoryRepository::new();
        repo.insert(&code("aaa111"), record("https://a.example"))
            .await
            .unwrap();
        repo.insert(&code("bbb222"), record("https://b.example"))
            .await
            .unwrap();

        let found = repo
            .get_many(&[code("aaa111"), code("zzz999"), code("bbb222")])
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["aaa111"].original_url, "https://a.example");
        assert_eq!(found["bbb222"].original_url, "https://b.example");
        assert!(!found.contains_key("zzz999"));
    }

    #[tokio::test]
    async fn list_returns_newest_first_up_to_limit() {
        let repo = InMemoryRepository::new();
        for (c, url) in [("aaa111", "https://a.example"), ("bbb222", "https://b.example"), ("ccc333", "https://c.example")] {
            repo.insert(&code(c), record(url)).await.unwrap();
        }

        let listed = repo.list(2).await.unwrap();
        let codes: Vec<_> = listed.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(codes, ["ccc333", "bbb222"]);
        assert_eq!(listed[0].1.original_url, "https://c.example");

        assert_eq!(repo.list(10).await.unwrap().len(), 3);
        assert!(repo.list(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_original_url_returns_first_code() {
        let repo = InMemoryRepository::new();
        repo.insert(&code("first1"), record("https://example.com"))
            .await
            .unwrap();
        repo.insert(&code("second"), record("https://example.com"))
            .await
            .unwrap();

        let found = repo
            .find_by_original_url("https://example.com")
            .await
            .unwrap();
        assert_eq!(found, Some(code("first1")));
        assert!(repo
            .find_by_original_url("https://unknown.example")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn record_click_increments_counter() {
        let repo = InMemoryRepository::new();
        repo.insert(&code("abc123"), record("https://example.com"))
            .await
            .unwrap();

        assert!(repo.record_click(&code("abc123")).await.unwrap());
        assert!(repo.record_click(&code("abc123")).await.unwrap());
        assert!(!repo.record_click(&code("nope")).await.unwrap());

        let result = repo.get(&code("abc123")).await.unwrap().unwrap();
        assert_eq!(result.clicks, 2);
    }

    #[tokio::test]
    async fn exists_checks() {
        let repo = InMemoryRepository::new();

        assert!(!repo.exists(&code("abc123")).await.unwrap());

        repo.insert(&code("abc123"), record("https://example.com"))
            .await
            .unwrap();

        assert!(repo.exists(&code("abc123")).await.unwrap());
    }

    #[tokio::test]
    async fn pool_take_is_fifo_and_empties() {
        let pool = InMemoryCodePool::new();
        let inserted = pool
            .insert_codes(&[code("AAAAA"), code("BBBBB")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let first = pool.take().await.unwrap().unwrap();
        let second = pool.take().await.unwrap().unwrap();
        assert_eq!(first.code, code("AAAAA"));
        assert_eq!(second.code, code("BBBBB"));
        assert!(first.sequence < second.sequence);
        assert!(pool.take().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pool_ignores_duplicates_including_taken_codes() {
        let pool = InMemoryCodePool::new();
        let inserted = pool
            .insert_codes(&[code("AAAAA"), code("AAAAA"), code("BBBBB")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let taken = pool.take().await.unwrap().unwrap();
        assert_eq!(taken.code, code("AAAAA"));

        // Re-generating an issued code must not put it back into the pool.
        let inserted = pool.insert_codes(&[code("AAAAA")]).await.unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(pool.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replenish_lock_is_exclusive() {
        let pool = InMemoryCodePool::new();

        let lease = pool.try_lock_replenish().await.unwrap().unwrap();
        assert!(pool.try_lock_replenish().await.unwrap().is_none());

        pool.unlock_replenish(lease).await.unwrap();
        assert!(pool.try_lock_replenish().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_takes_are_distinct() {
        let pool = Arc::new(InMemoryCodePool::new());
        let codes: Vec<_> = (0..50).map(|i| code(&format!("code-{i:03}"))).collect();
        pool.insert_codes(&codes).await.unwrap();

        let mut handles = vec![];
        for _ in 0..50 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.take().await.unwrap() }));
        }

        let mut taken = HashSet::new();
        for handle in handles {
            let entry = handle.await.unwrap().unwrap();
            assert!(taken.insert(entry.code));
        }
        assert_eq!(taken.len(), 50);
        assert_eq!(pool.size().await.unwrap(), 0);
    }
}
