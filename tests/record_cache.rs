//! Record cache write-through and idempotency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use potd_relay::cache::RecordCache;
use potd_relay::errors::FetchError;
use potd_relay::models::{MediaKind, Record};
use potd_relay::store::{AppendLogStore, MemoryStore};
use potd_relay::upstream::Upstream;

fn record(date: &str) -> Record {
    Record {
        date: date.to_string(),
        title: "A Day".to_string(),
        explanation: "Words about the day".to_string(),
        url: "https://example.com/low.jpg".to_string(),
        hd_url: Some("https://example.com/hd.jpg".to_string()),
        media_kind: MediaKind::Image,
        thumbnail: None,
        copyright: Some("Somebody".to_string()),
        service_version: Some("v1".to_string()),
    }
}

struct CountingUpstream {
    calls: AtomicUsize,
}

#[async_trait]
impl Upstream for CountingUpstream {
    async fn fetch_one(&self, date: &str) -> Result<Record, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(record(date))
    }

    async fn fetch_range(&self, _: &str, _: &str) -> Result<Vec<Record>, FetchError> {
        unimplemented!()
    }

    async fn fetch_binary(&self, _: &str) -> Result<Vec<u8>, FetchError> {
        unimplemented!()
    }
}

#[tokio::test]
async fn repeated_gets_fetch_upstream_once() {
    let upstream = Arc::new(CountingUpstream {
        calls: AtomicUsize::new(0),
    });
    let cache = RecordCache::new(Arc::new(MemoryStore::<Record>::new()), upstream.clone());

    let first = cache.get_or_fetch("2024-03-01").await.unwrap();
    let second = cache.get_or_fetch("2024-03-01").await.unwrap();
    let third = cache.get_or_fetch("2024-03-01").await.unwrap();

    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[tokio::test]
async fn fetched_records_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.log");
    let upstream = Arc::new(CountingUpstream {
        calls: AtomicUsize::new(0),
    });

    {
        let store: Arc<AppendLogStore<Record>> = Arc::new(AppendLogStore::open(&path).await.unwrap());
        let cache = RecordCache::new(store, upstream.clone());
        cache.get_or_fetch("2024-03-01").await.unwrap();
    }

    let store: Arc<AppendLogStore<Record>> = Arc::new(AppendLogStore::open(&path).await.unwrap());
    let cache = RecordCache::new(store, upstream.clone());

    // Served from the replayed log, not the upstream.
    let found = cache.get_or_fetch("2024-03-01").await.unwrap();
    assert_eq!(found, record("2024-03-01"));
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn write_all_dumps_newline_delimited_json() {
    let upstream = Arc::new(CountingUpstream {
        calls: AtomicUsize::new(0),
    });
    let cache = RecordCache::new(Arc::new(MemoryStore::<Record>::new()), upstream);
    cache.add_all(vec![record("2024-03-01"), record("2024-03-02")])
        .await
        .unwrap();

    let mut out = Vec::new();
    cache.write_all(&mut out).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let parsed: Record = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(parsed.date, "2024-03-01");
}
