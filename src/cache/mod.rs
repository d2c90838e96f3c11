//! Caching layers over the durable stores.
//!
//! [`RecordCache`] is the typed record cache with upstream write-through;
//! [`image`] holds the secondary caches for transcoded images.

use std::sync::Arc;

use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::Record;
use crate::store::KeyedStore;
use crate::upstream::Upstream;

pub mod image;

pub use image::{DirectoryImageCache, DiscardImageCache, ImageCache, MemoryImageCache};

/// Typed cache of upstream records.
///
/// Lookups fall back to the upstream on a miss and write the result through
/// to the store, so repeated gets for a date issue at most one upstream
/// fetch. The fetch itself runs outside any store lock.
pub struct RecordCache {
    store: Arc<dyn KeyedStore<Record>>,
    upstream: Arc<dyn Upstream>,
}

impl RecordCache {
    pub fn new(store: Arc<dyn KeyedStore<Record>>, upstream: Arc<dyn Upstream>) -> Self {
        Self { store, upstream }
    }

    /// Cached record for a date, if present
    pub async fn get(&self, date: &str) -> Option<Record> {
        self.store.get(date).await
    }

    pub async fn has(&self, date: &str) -> bool {
        self.store.has(date).await
    }

    /// The record for a date, fetching and persisting on a miss.
    ///
    /// A persistence failure propagates and the fetch is considered not to
    /// have happened; the next call will fetch again.
    pub async fn get_or_fetch(&self, date: &str) -> AppResult<Record> {
        if let Some(record) = self.store.get(date).await {
            return Ok(record);
        }

        let record = self.upstream.fetch_one(date).await?;
        self.store.add(date, record.clone()).await?;
        debug!(date, "cached record");
        Ok(record)
    }

    /// A random day's record from `[first, today]`, with the same cache
    /// semantics as [`RecordCache::get_or_fetch`]
    pub async fn get_random(&self, first: chrono::NaiveDate) -> AppResult<Record> {
        let day = crate::utils::random_date(first);
        self.get_or_fetch(&day.format(crate::utils::DAY_FORMAT).to_string())
            .await
    }

    /// Add a batch of fetched records, skipping dates already cached
    pub async fn add_all(&self, records: Vec<Record>) -> AppResult<()> {
        let entries = records.into_iter().map(|r| (r.date.clone(), r)).collect();
        self.store.add_all(entries).await.map_err(AppError::from)
    }

    /// Dump every cached record as newline-delimited JSON
    pub async fn write_all(&self, out: &mut impl std::io::Write) -> AppResult<()> {
        let mut keys = self.store.keys().await;
        keys.sort();
        for key in keys {
            if let Some(record) = self.store.get(&key).await {
                let line = serde_json::to_string(&record)
                    .map_err(|e| AppError::internal(e.to_string()))?;
                writeln!(out, "{line}").map_err(|e| AppError::internal(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.store.keys().await.len()
    }
}
