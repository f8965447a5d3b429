use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tinylink_core::{
    ClickRecorder, CodePool, ReadRepository, Repository, ShortCode, StorageError, UrlRecord,
};
use tinylink_storage::{PostgresCodePool, PostgresRepository};
use tinylink_test_infra::postgres::{PostgresConfig, PostgresServer};

struct Fixture {
    _postgres: PostgresServer,
    repo: PostgresRepository,
    pool: PostgresCodePool,
}

impl Fixture {
    async fn start() -> Self {
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");

        let repo = connect_with_retry(&url).await;
        repo.migrate().await.expect("create short_urls");

        let pool = PostgresCodePool::new(repo.pool().clone());
        pool.migrate().await.expect("create code_pool");

        Self {
            _postgres: postgres,
            repo,
            pool,
        }
    }
}

async fn connect_with_retry(url: &str) -> PostgresRepository {
    let mut last_error = None;

    for _ in 0..20 {
        match PostgresRepository::connect(url, 16).await {
            Ok(repo) => return repo,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

#[tokio::test]
async fn insert_and_get_record() {
    let fixture = Fixture::start().await;
    let short_code = code("abc123");

    fixture
        .repo
        .insert(&short_code, UrlRecord::new("https://example.com"))
        .await
        .unwrap();

    let got = fixture.repo.get(&short_code).await.unwrap().unwrap();
    assert_eq!(got.original_url, "https://example.com");
    assert_eq!(got.clicks, 0);
    assert!(fixture.repo.get(&code("zzz999")).await.unwrap().is_none());
}

#[tokio::test]
async fn insert_conflicts_when_code_already_exists() {
    let fixture = Fixture::start().await;
    let short_code = code("abc123");

    fixture
        .repo
        .insert(&short_code, UrlRecord::new("https://one.example"))
        .await
        .unwrap();

    let err = fixture
        .repo
        .insert(&short_code, UrlRecord::new("https://two.example"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Conflict(_)));
    let got = fixture.repo.get(&short_code).await.unwrap().unwrap();
    assert_eq!(got.original_url, "https://one.example");
}

#[tokio::test]
async fn get_many_returns_only_existing_codes() {
    let fixture = Fixture::start().await;
    fixture
        .repo
        .insert(&code("abc123"), UrlRecord::new("https://a.example"))
        .await
        .unwrap();
    fixture
        .repo
        .insert(&code("def456"), UrlRecord::new("https://d.example"))
        .await
        .unwrap();

    let found = fixture
        .repo
        .get_many(&[code("abc123"), code("zzz999"), code("def456")])
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found["abc123"].original_url, "https://a.example");
    assert_eq!(found["def456"].original_url, "https://d.example");
    assert!(fixture.repo.get_many(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn clicks_and_reverse_lookup() {
    let fixture = Fixture::start().await;
    fixture
        .repo
        .insert(&code("abc123"), UrlRecord::new("https://example.com"))
        .await
        .unwrap();

    assert!(fixture.repo.record_click(&code("abc123")).await.unwrap());
    assert!(!fixture.repo.record_click(&code("zzz999")).await.unwrap());
    assert_eq!(
        fixture.repo.get(&code("abc123")).await.unwrap().unwrap().clicks,
        1
    );

    assert_eq!(
        fixture
            .repo
            .find_by_original_url("https://example.com")
            .await
            .unwrap(),
        Some(code("abc123"))
    );
    assert!(fixture.repo.exists(&code("abc123")).await.unwrap());
}

#[tokio::test]
async fn pool_take_claims_oldest_code_once() {
    let fixture = Fixture::start().await;

    let inserted = fixture
        .pool
        .insert_codes(&[code("AAAAA"), code("BBBBB"), code("AAAAA")])
        .await
        .unwrap();
    assert_eq!(inserted, 2);
    assert_eq!(fixture.pool.size().await.unwrap(), 2);

    assert_eq!(fixture.pool.take().await.unwrap().unwrap().code, code("AAAAA"));
    assert_eq!(fixture.pool.take().await.unwrap().unwrap().code, code("BBBBB"));
    assert!(fixture.pool.take().await.unwrap().is_none());

    // Claimed codes are remembered and never re-enter the pool.
    let inserted = fixture.pool.insert_codes(&[code("AAAAA")]).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(fixture.pool.size().await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_takes_never_share_a_code() {
    let fixture = Fixture::start().await;
    let codes: Vec<_> = (0..100).map(|i| code(&format!("c{i:05}"))).collect();
    fixture.pool.insert_codes(&codes).await.unwrap();

    let pool = Arc::new(fixture.pool.clone());
    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            for _ in 0..10 {
                taken.push(pool.take().await.unwrap().unwrap().code);
            }
            taken
        }));
    }

    let mut all = HashSet::new();
    for handle in handles {
        for taken in handle.await.unwrap() {
            assert!(all.insert(taken), "code handed out twice");
        }
    }

    assert_eq!(all.len(), 100);
    assert_eq!(fixture.pool.size().await.unwrap(), 0);
}

#[tokio::test]
async fn replenish_lock_is_exclusive_across_connections() {
    let fixture = Fixture::start().await;

    let lease = fixture.pool.try_lock_replenish().await.unwrap().unwrap();
    assert!(fixture.pool.try_lock_replenish().await.unwrap().is_none());

    fixture.pool.unlock_replenish(lease).await.unwrap();
    let lease = fixture.pool.try_lock_replenish().await.unwrap().unwrap();
    fixture.pool.unlock_replenish(lease).await.unwrap();
}

#[tokio::test]
async fn failed_unlock_does_not_leak_the_lock() {
    let fixture = Fixture::start().await;
    let lease = fixture.pool.try_lock_replenish().await.unwrap().unwrap();

    // Kill the session holding the lease so the unlock query fails.
    let holder: i32 =
        sqlx::query_scalar("SELECT pid FROM pg_locks WHERE locktype = 'advisory' AND granted")
            .fetch_one(fixture.pool.pool())
            .await
            .unwrap();
    sqlx::query("SELECT pg_terminate_backend($1)")
        .bind(holder)
        .execute(fixture.pool.pool())
        .await
        .unwrap();

    assert!(fixture.pool.unlock_replenish(lease).await.is_err());

    let lease = fixture.pool.try_lock_replenish().await.unwrap().unwrap();
    fixture.pool.unlock_replenish(lease).await.unwrap();
    assert_eq!(fixture.pool.size().await.unwrap(), 0);
}

#[tokio::test]
async fn list_returns_newest_mappings_first() {
    let fixture = Fixture::start().await;
    for (short_code, url) in [
        ("aaa111", "https://a.example"),
        ("bbb222", "https://b.example"),
        ("ccc333", "https://c.example"),
    ] {
        fixture
            .repo
            .insert(&code(short_code), UrlRecord::new(url))
            .await
            .unwrap();
    }

    let listed = fixture.repo.list(2).await.unwrap();
    let codes: Vec<_> = listed.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(codes, ["ccc333", "bbb222"]);
    assert_eq!(listed[1].1.original_url, "https://b.example");
    assert_eq!(fixture.repo.list(100).await.unwrap().len(), 3);
}
