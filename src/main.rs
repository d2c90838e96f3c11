use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use potd_relay::{
    backfill::BackfillEngine,
    cache::{DirectoryImageCache, DiscardImageCache, ImageCache, MemoryImageCache, RecordCache},
    config::{Config, ImageCacheKind},
    models::Record,
    schedule::ScheduleStore,
    scheduler::Scheduler,
    sink::WebhookSink,
    store::{AppendLogStore, KeyedStore},
    upstream::{HttpUpstream, Upstream},
};

#[derive(Parser)]
#[command(name = "potd-relay")]
#[command(version)]
#[command(about = "Picture-of-the-day relay with durable caching, backfill and scheduled delivery")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Run a one-shot backfill pass alongside the scheduler
    #[arg(long)]
    backfill: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("potd_relay={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting potd-relay v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(&config.upstream)?);

    let record_store: Arc<dyn KeyedStore<Record>> =
        Arc::new(AppendLogStore::open(&config.storage.record_log_path).await?);
    let records = Arc::new(RecordCache::new(record_store, upstream.clone()));
    info!("Record cache ready with {} entries", records.len().await);

    let images: Arc<dyn ImageCache> = match config.storage.image_cache {
        ImageCacheKind::Directory => Arc::new(
            DirectoryImageCache::open(config.storage.image_cache_dir.clone()).await?,
        ),
        ImageCacheKind::Memory => Arc::new(MemoryImageCache::new(config.storage.memory_cache_bytes)),
        ImageCacheKind::None => Arc::new(DiscardImageCache::new()),
    };

    let schedule = Arc::new(ScheduleStore::open(&config.storage.schedule_log_path).await?);
    info!("Schedule loaded with {} channels", schedule.len().await);

    let sink = Arc::new(WebhookSink::new(Duration::from_secs(
        config.delivery.webhook_timeout_seconds,
    ))?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let backfill_handle = if cli.backfill {
        let engine = BackfillEngine::new(
            records.clone(),
            upstream.clone(),
            config.backfill.options()?,
            shutdown_rx.clone(),
        );
        Some(tokio::spawn(async move {
            engine.run().await;
        }))
    } else {
        None
    };

    let scheduler = Scheduler::new(
        records,
        images,
        schedule,
        sink,
        upstream,
        config.delivery.image_budget_bytes,
        config.scheduler.retry_policy(),
        shutdown_rx,
    );
    scheduler.run().await?;

    // Let an in-flight backfill step finish rather than tearing it down
    // mid-write.
    if let Some(handle) = backfill_handle {
        if let Err(e) = handle.await {
            error!("Backfill task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}
