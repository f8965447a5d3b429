use std::sync::Arc;
use std::time::Duration;

use tinylink_core::{ReadRepository, Repository, ShortCode, UrlRecord};
use tinylink_redirector::{BatcherSettings, Redirector, RedirectorService};
use tinylink_storage::InMemoryRepository;

fn code(value: &str) -> ShortCode {
    ShortCode::new_unchecked(value)
}

async fn service_with(
    records: &[(&str, &str)],
    settings: BatcherSettings,
) -> (Arc<RedirectorService<InMemoryRepository>>, Arc<InMemoryRepository>) {
    let repository = Arc::new(InMemoryRepository::new());
    for (short_code, url) in records {
        repository
            .insert(&code(short_code), UrlRecord::new(*url))
            .await
            .unwrap();
    }
    let service = Arc::new(RedirectorService::new(Arc::clone(&repository), settings));
    (service, repository)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redirects_are_resolved_in_batches() {
    let records: Vec<(String, String)> = (0..50)
        .map(|i| (format!("code{i:03}"), format!("https://example.com/{i}")))
        .collect();
    let borrowed: Vec<(&str, &str)> = records
        .iter()
        .map(|(c, u)| (c.as_str(), u.as_str()))
        .collect();
    let (service, _) = service_with(
        &borrowed,
        BatcherSettings::builder()
            .batch_size(10)
            .max_wait(Duration::from_millis(20))
            .build(),
    )
    .await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let record = service.resolve(&code(&format!("code{i:03}"))).await;
            (i, record)
        }));
    }

    for handle in handles {
        let (i, record) = handle.await.unwrap();
        let record = record.unwrap().expect("seeded code should resolve");
        assert_eq!(record.original_url, format!("https://example.com/{i}"));
    }

    let stats = service.stats();
    assert_eq!(stats.total_requests, 50);
    assert!(stats.batches_processed <= 50);
    assert!(stats.avg_batch_size >= 1.0);
    assert_eq!(stats.queue_size, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn served_redirects_increment_clicks_eventually() {
    let (service, repository) = service_with(
        &[("abc123", "https://example.com")],
        BatcherSettings::builder()
            .batch_size(2)
            .max_wait(Duration::from_millis(10))
            .build(),
    )
    .await;

    for _ in 0..3 {
        let record = service.resolve(&code("abc123")).await.unwrap();
        assert_eq!(record.unwrap().original_url, "https://example.com");
    }
    assert!(service.resolve(&code("zzz999")).await.unwrap().is_none());

    awaitility::at_most(Duration::from_secs(5))
        .poll_interval(Duration::from_millis(20))
        .until_async(|| async {
            let record = repository.get(&code("abc123")).await.unwrap().unwrap();
            record.clicks == 3
        })
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_resolves_queued_redirects() {
    let (service, _) = service_with(
        &[("abc123", "https://example.com")],
        BatcherSettings::builder()
            .batch_size(100)
            .max_wait(Duration::from_secs(60))
            .build(),
    )
    .await;

    let pending = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.resolve(&code("abc123")).await })
    };

    awaitility::at_most(Duration::from_secs(5))
        .poll_interval(Duration::from_millis(10))
        .until(|| service.stats().queue_size == 1);

    service.shutdown().await;

    let record = pending.await.unwrap().unwrap();
    assert_eq!(record.unwrap().original_url, "https://example.com");
}
