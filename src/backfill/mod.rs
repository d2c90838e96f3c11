//! Gap-detecting backfill against the upstream source.
//!
//! Reconciles the record cache with the upstream over `[first_date, today]`
//! in two passes: batched range fetches for contiguous gaps (capped so a
//! single request never covers more than the range cap), then per-day
//! fetches for whatever is still missing. Individual failures skip that
//! date or range for the pass; the engine never aborts early, so a re-run is
//! the way residual gaps close.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::RecordCache;
use crate::upstream::Upstream;
use crate::utils::dates::{today_utc, DAY_FORMAT};

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Earliest date the upstream has data for
    pub first_date: NaiveDate,
    /// Hard cap on the width of one range fetch, in days
    pub range_cap_days: i64,
    /// Pause between range fetches
    pub batch_pause: Duration,
    /// Pause between per-day fetches in the second pass
    pub item_pause: Duration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            first_date: NaiveDate::from_ymd_opt(1995, 6, 16).expect("valid date"),
            range_cap_days: 30,
            batch_pause: Duration::from_secs(5),
            item_pause: Duration::from_secs(1),
        }
    }
}

pub struct BackfillEngine {
    cache: Arc<RecordCache>,
    upstream: Arc<dyn Upstream>,
    options: BackfillOptions,
    shutdown: watch::Receiver<bool>,
}

impl BackfillEngine {
    pub fn new(
        cache: Arc<RecordCache>,
        upstream: Arc<dyn Upstream>,
        options: BackfillOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cache,
            upstream,
            options,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run both passes to completion. Returns the number of records added.
    ///
    /// Completion is not a completeness guarantee: dates whose fetches
    /// failed remain missing until the next run.
    pub async fn run(&self) -> usize {
        let today = today_utc();
        info!(
            from = %self.options.first_date,
            to = %today,
            "starting backfill"
        );

        let before = self.cache.len().await;
        self.fill_ranges(today).await;
        self.fill_singletons(today).await;
        let added = self.cache.len().await.saturating_sub(before);

        info!(added, "backfill finished");
        added
    }

    /// Pass 1: find each contiguous missing run and fetch it as one range.
    async fn fill_ranges(&self, today: NaiveDate) {
        let mut day = self.options.first_date;

        while day <= today && !self.stopping() {
            if self.cache.has(&day.format(DAY_FORMAT).to_string()).await {
                day += chrono::Duration::days(1);
                continue;
            }

            // Found a gap; extend to the end of the missing run, the range
            // cap, or today, whichever is first.
            let mut end = day;
            loop {
                let next = end + chrono::Duration::days(1);
                if next > today
                    || (next - day).num_days() >= self.options.range_cap_days
                    || self.cache.has(&next.format(DAY_FORMAT).to_string()).await
                {
                    break;
                }
                end = next;
            }

            let start_key = day.format(DAY_FORMAT).to_string();
            let end_key = end.format(DAY_FORMAT).to_string();
            debug!(start = %start_key, end = %end_key, "filling gap");

            match self.upstream.fetch_range(&start_key, &end_key).await {
                Ok(records) => {
                    let count = records.len();
                    if let Err(e) = self.cache.add_all(records).await {
                        warn!(start = %start_key, end = %end_key, error = %e,
                            "failed to persist range, will retry on next run");
                    } else {
                        debug!(count, start = %start_key, "cached range");
                    }
                    day = end + chrono::Duration::days(1);
                }
                Err(e) => {
                    // Leave the gap for the second pass and keep scanning.
                    warn!(start = %start_key, end = %end_key, error = %e, "range fetch failed");
                    day += chrono::Duration::days(1);
                }
            }

            tokio::time::sleep(self.options.batch_pause).await;
        }
    }

    /// Pass 2: fetch the remaining singleton gaps one day at a time.
    async fn fill_singletons(&self, today: NaiveDate) {
        let mut day = self.options.first_date;

        while day <= today && !self.stopping() {
            let key = day.format(DAY_FORMAT).to_string();
            day += chrono::Duration::days(1);

            if self.cache.has(&key).await {
                continue;
            }

            if let Err(e) = self.cache.get_or_fetch(&key).await {
                warn!(date = %key, error = %e, "single fetch failed");
            }
            tokio::time::sleep(self.options.item_pause).await;
        }
    }
}
