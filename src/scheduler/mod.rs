//! Hourly delivery loop.
//!
//! Two states: idle (sleeping until the next top of the hour, UTC) and
//! dispatching. A dispatch resolves today's record once, resolves its image
//! once, then fans out to every channel registered for the current hour.
//! Per-channel failures are isolated; a channel that fails simply gets no
//! `Sent` marker this tick.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cache::{ImageCache, RecordCache};
use crate::errors::{AppError, AppResult};
use crate::schedule::ScheduleStore;
use crate::sink::DeliverySink;
use crate::transcode::ImageArtifact;
use crate::upstream::Upstream;
use crate::utils::dates::{today_utc, DAY_FORMAT};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

/// Seconds / minutes / hours / day-of-month / month / day-of-week
const TOP_OF_THE_HOUR: &str = "0 0 * * * *";

pub struct Scheduler {
    records: Arc<RecordCache>,
    images: Arc<dyn ImageCache>,
    schedule: Arc<ScheduleStore>,
    sink: Arc<dyn DeliverySink>,
    upstream: Arc<dyn Upstream>,
    image_budget: usize,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Arc<RecordCache>,
        images: Arc<dyn ImageCache>,
        schedule: Arc<ScheduleStore>,
        sink: Arc<dyn DeliverySink>,
        upstream: Arc<dyn Upstream>,
        image_budget: usize,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            records,
            images,
            schedule,
            sink,
            upstream,
            image_budget,
            retry,
            shutdown,
        }
    }

    /// Drop schedule entries whose channels are no longer reachable.
    ///
    /// Probes run against a snapshot, outside any store lock; the removals
    /// are logged as regular `Remove` events.
    pub async fn prune_unreachable(&self) {
        let snapshot = self.schedule.snapshot().await;

        let mut unreachable = HashSet::new();
        for (channel, _) in snapshot.channels() {
            if !self.sink.is_reachable(channel).await {
                unreachable.insert(channel.to_string());
            }
        }

        if unreachable.is_empty() {
            return;
        }
        match self
            .schedule
            .remove_if(|channel, _| unreachable.contains(channel))
            .await
        {
            Ok(removed) => info!(removed, "pruned unreachable channels"),
            Err(e) => error!(error = %e, "failed to prune schedule"),
        }
    }

    /// Run until shutdown. Fires one dispatch per top of the hour.
    pub async fn run(mut self) -> AppResult<()> {
        self.prune_unreachable().await;

        let tick = Schedule::from_str(TOP_OF_THE_HOUR)
            .map_err(|e| AppError::internal(format!("tick schedule: {e}")))?;
        info!(channels = self.schedule.len().await, "scheduler started");

        loop {
            let Some(next) = tick.upcoming(Utc).next() else {
                return Err(AppError::internal("tick schedule has no next fire time"));
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next.format("%Y-%m-%d %H:%M:%S UTC"), "sleeping until next tick");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.changed() => {}
            }
            if *self.shutdown.borrow() {
                info!("scheduler stopping");
                return Ok(());
            }

            // Once dispatching starts it runs to completion; shutdown is
            // only observed between ticks.
            let hour = Utc::now().hour() as u8;
            self.dispatch(hour).await;
        }
    }

    /// One dispatch cycle for the given UTC hour.
    pub async fn dispatch(&self, hour: u8) {
        let date = today_utc().format(DAY_FORMAT).to_string();
        debug!(hour, date = %date, "dispatching");

        let record = match retry_with_backoff(self.retry, || self.records.get_or_fetch(&date)).await
        {
            Ok(record) => record,
            Err(e) => {
                error!(date = %date, error = %e, "could not resolve today's record, skipping tick");
                return;
            }
        };

        let image = match self.resolve_image(&record.date, record.image_url()).await {
            Ok(image) => image,
            Err(e) => {
                error!(date = %date, error = %e, "could not resolve today's image, skipping tick");
                return;
            }
        };

        let snapshot = self.schedule.snapshot().await;
        for channel in snapshot.channels_for_hour(hour) {
            match self.sink.deliver(&channel, &record, &image).await {
                Ok(()) => {
                    info!(channel = %channel, date = %record.date, "delivered");
                    if let Err(e) = self.schedule.sent(&channel, &record.date).await {
                        error!(channel = %channel, error = %e, "failed to record delivery");
                    }
                }
                Err(e) => {
                    // Isolated; the channel can be retried when its hour
                    // matches again.
                    warn!(channel = %channel, error = %e, "delivery failed");
                }
            }
        }
    }

    async fn resolve_image(&self, day: &str, url: Option<&str>) -> AppResult<ImageArtifact> {
        let Some(url) = url else {
            return Err(AppError::internal(format!("record {day} has no image source")));
        };

        let upstream = self.upstream.clone();
        let url = url.to_string();
        let budget = self.image_budget;

        self.images
            .get_or_set(
                day,
                Box::pin(async move {
                    let bytes = upstream.fetch_binary(&url).await?;
                    let artifact = ImageArtifact::decode(bytes)?.fit(budget)?;
                    Ok(artifact)
                }),
            )
            .await
    }
}
