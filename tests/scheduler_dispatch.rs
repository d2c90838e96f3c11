//! Dispatch fan-out: who gets a delivery, what gets recorded, and how
//! failures are isolated.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use potd_relay::cache::{MemoryImageCache, RecordCache};
use potd_relay::errors::{AppError, AppResult, FetchError};
use potd_relay::models::{MediaKind, Record};
use potd_relay::schedule::ScheduleStore;
use potd_relay::scheduler::Scheduler;
use potd_relay::sink::DeliverySink;
use potd_relay::store::MemoryStore;
use potd_relay::transcode::ImageArtifact;
use potd_relay::upstream::Upstream;
use potd_relay::utils::retry::RetryPolicy;

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([128, 64, 32]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

struct FakeUpstream {
    fetches: AtomicUsize,
    fail_records: bool,
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn fetch_one(&self, date: &str) -> Result<Record, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_records {
            return Err(FetchError::transient("upstream down"));
        }
        Ok(Record {
            date: date.to_string(),
            title: "Today".to_string(),
            explanation: "About today".to_string(),
            url: "https://example.com/today.png".to_string(),
            hd_url: Some("https://example.com/today-hd.png".to_string()),
            media_kind: MediaKind::Image,
            thumbnail: None,
            copyright: None,
            service_version: None,
        })
    }

    async fn fetch_range(&self, _: &str, _: &str) -> Result<Vec<Record>, FetchError> {
        unimplemented!()
    }

    async fn fetch_binary(&self, _: &str) -> Result<Vec<u8>, FetchError> {
        Ok(png_bytes())
    }
}

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<(String, String)>>,
    failing: HashSet<String>,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(
        &self,
        channel_id: &str,
        record: &Record,
        _image: &ImageArtifact,
    ) -> AppResult<()> {
        if self.failing.contains(channel_id) {
            return Err(AppError::delivery(channel_id, "channel gone"));
        }
        self.delivered
            .lock()
            .await
            .push((channel_id.to_string(), record.date.clone()));
        Ok(())
    }

    async fn is_reachable(&self, channel_id: &str) -> bool {
        !self.failing.contains(channel_id)
    }
}

struct Fixture {
    scheduler: Scheduler,
    schedule: Arc<ScheduleStore>,
    sink: Arc<RecordingSink>,
    upstream: Arc<FakeUpstream>,
    _dir: tempfile::TempDir,
}

async fn fixture(fail_records: bool, failing_channels: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let upstream = Arc::new(FakeUpstream {
        fetches: AtomicUsize::new(0),
        fail_records,
    });
    let records = Arc::new(RecordCache::new(
        Arc::new(MemoryStore::<Record>::new()),
        upstream.clone(),
    ));
    let schedule = Arc::new(
        ScheduleStore::open(dir.path().join("events.log"))
            .await
            .unwrap(),
    );
    let sink = Arc::new(RecordingSink {
        delivered: Mutex::new(Vec::new()),
        failing: failing_channels.iter().map(|c| c.to_string()).collect(),
    });

    let (_tx, shutdown) = watch::channel(false);
    let scheduler = Scheduler::new(
        records,
        Arc::new(MemoryImageCache::new(10 * 1024 * 1024)),
        schedule.clone(),
        sink.clone(),
        upstream.clone(),
        1024 * 1024,
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        shutdown,
    );

    Fixture {
        scheduler,
        schedule,
        sink,
        upstream,
        _dir: dir,
    }
}

#[tokio::test]
async fn dispatch_reaches_only_channels_registered_for_the_hour() {
    let f = fixture(false, &[]).await;
    f.schedule.set("morning", 9).await.unwrap();
    f.schedule.set("evening", 21).await.unwrap();

    f.scheduler.dispatch(9).await;

    let delivered = f.sink.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "morning");

    drop(delivered);
    assert!(f.schedule.last_delivered("morning").await.is_some());
    assert!(f.schedule.last_delivered("evening").await.is_none());
}

#[tokio::test]
async fn one_failing_channel_does_not_block_the_others() {
    let f = fixture(false, &["broken"]).await;
    f.schedule.set("broken", 9).await.unwrap();
    f.schedule.set("healthy", 9).await.unwrap();

    f.scheduler.dispatch(9).await;

    let delivered = f.sink.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "healthy");

    drop(delivered);
    // The failed channel gets no marker; it can be retried next cycle.
    assert!(f.schedule.last_delivered("broken").await.is_none());
    assert!(f.schedule.last_delivered("healthy").await.is_some());
}

#[tokio::test]
async fn exhausted_retries_skip_the_tick_without_deliveries() {
    let f = fixture(true, &[]).await;
    f.schedule.set("morning", 9).await.unwrap();

    f.scheduler.dispatch(9).await;

    assert!(f.sink.delivered.lock().await.is_empty());
    // Bounded: exactly max_attempts fetches, then the tick was dropped.
    assert_eq!(f.upstream.fetches.load(Ordering::SeqCst), 2);
    assert!(f.schedule.last_delivered("morning").await.is_none());
}

#[tokio::test]
async fn second_dispatch_reuses_cached_record_and_image() {
    let f = fixture(false, &[]).await;
    f.schedule.set("morning", 9).await.unwrap();

    f.scheduler.dispatch(9).await;
    f.scheduler.dispatch(9).await;

    assert_eq!(f.sink.delivered.lock().await.len(), 2);
    assert_eq!(f.upstream.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn prune_unreachable_logs_removals() {
    let f = fixture(false, &["gone"]).await;
    f.schedule.set("gone", 9).await.unwrap();
    f.schedule.set("here", 9).await.unwrap();

    f.scheduler.prune_unreachable().await;

    let state = f.schedule.snapshot().await;
    assert_eq!(state.hour_for("gone"), None);
    assert_eq!(state.hour_for("here"), Some(9));
}
