//! Secondary caches for transcoded images.
//!
//! Three variants behind one interface: an unbounded on-disk cache (the
//! historical archive), a byte-bounded in-memory LRU, and a discard cache for
//! deployments that opt out of image caching.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::transcode::{ImageArtifact, ImageKind};

/// Boxed fallback used by [`ImageCache::get_or_set`] to resolve a miss
pub type ImageFuture<'a> = Pin<Box<dyn Future<Output = AppResult<ImageArtifact>> + Send + 'a>>;

#[async_trait]
pub trait ImageCache: Send + Sync {
    async fn get(&self, day: &str) -> Option<ImageArtifact>;

    async fn set(&self, day: &str, artifact: ImageArtifact) -> AppResult<()>;

    /// The cached artifact for a day, resolving and caching it on a miss.
    ///
    /// A failure to cache the resolved artifact is logged but does not fail
    /// the lookup; the artifact is still returned.
    async fn get_or_set<'a>(
        &'a self,
        day: &'a str,
        fallback: ImageFuture<'a>,
    ) -> AppResult<ImageArtifact> {
        if let Some(found) = self.get(day).await {
            return Ok(found);
        }

        let artifact = fallback.await?;
        if let Err(e) = self.set(day, artifact.clone()).await {
            warn!(day, error = %e, "failed to cache resolved image");
        }
        Ok(artifact)
    }
}

/// Unbounded on-disk cache: one file per day, extension carries the format.
///
/// Nothing is ever evicted; the directory doubles as the historical archive.
pub struct DirectoryImageCache {
    dir: PathBuf,
    // day -> format of the file on disk
    ready: RwLock<HashMap<String, ImageKind>>,
}

impl DirectoryImageCache {
    pub async fn open(dir: PathBuf) -> AppResult<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::internal(format!("image cache dir: {e}")))?;

        let mut ready = HashMap::new();
        let mut listing = fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::internal(format!("image cache dir: {e}")))?;
        while let Some(entry) = listing
            .next_entry()
            .await
            .map_err(|e| AppError::internal(e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some((day, ext)) = name.rsplit_once('.') {
                if let Some(kind) = ImageKind::from_extension(ext) {
                    ready.insert(day.to_string(), kind);
                }
            }
        }

        info!(dir = %dir.display(), entries = ready.len(), "populated image cache");
        Ok(Self {
            dir,
            ready: RwLock::new(ready),
        })
    }

    fn path_for(&self, day: &str, kind: ImageKind) -> PathBuf {
        self.dir.join(format!("{day}.{}", kind.extension()))
    }

    pub async fn len(&self) -> usize {
        self.ready.read().await.len()
    }
}

#[async_trait]
impl ImageCache for DirectoryImageCache {
    async fn get(&self, day: &str) -> Option<ImageArtifact> {
        let kind = *self.ready.read().await.get(day)?;

        let data = match fs::read(self.path_for(day, kind)).await {
            Ok(data) => data,
            Err(e) => {
                warn!(day, error = %e, "cached image could not be read, treating as miss");
                return None;
            }
        };

        match ImageArtifact::decode(data) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!(day, error = %e, "cached image could not be decoded, treating as miss");
                None
            }
        }
    }

    async fn set(&self, day: &str, artifact: ImageArtifact) -> AppResult<()> {
        let kind = artifact.format();
        fs::write(self.path_for(day, kind), artifact.bytes())
            .await
            .map_err(|e| AppError::internal(format!("writing image for {day}: {e}")))?;

        self.ready.write().await.insert(day.to_string(), kind);
        debug!(day, "saved image");
        Ok(())
    }
}

struct MemoryState {
    lru: LruCache<String, ImageArtifact>,
    used: usize,
}

/// Byte-bounded in-memory cache with least-recently-used eviction.
///
/// Concurrent misses for the same day collapse into a single upstream
/// resolution; waiters pick up the cached result.
pub struct MemoryImageCache {
    capacity: usize,
    state: Mutex<MemoryState>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(MemoryState {
                lru: LruCache::unbounded(),
                used: 0,
            }),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Total bytes currently resident
    pub async fn used(&self) -> usize {
        self.state.lock().await.used
    }

    async fn gate_for(&self, day: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight
            .entry(day.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_gate(&self, day: &str) {
        self.inflight.lock().await.remove(day);
    }
}

#[async_trait]
impl ImageCache for MemoryImageCache {
    async fn get(&self, day: &str) -> Option<ImageArtifact> {
        self.state.lock().await.lru.get(day).cloned()
    }

    async fn set(&self, day: &str, artifact: ImageArtifact) -> AppResult<()> {
        let size = artifact.len();
        if size > self.capacity {
            return Err(AppError::OverCapacity {
                size,
                capacity: self.capacity,
            });
        }

        let mut state = self.state.lock().await;
        if let Some((_, replaced)) = state.lru.push(day.to_string(), artifact) {
            state.used -= replaced.len();
        }
        state.used += size;

        // The new entry is most-recent, so eviction only ever removes others.
        while state.used > self.capacity {
            match state.lru.pop_lru() {
                Some((evicted_day, evicted)) => {
                    state.used -= evicted.len();
                    debug!(day = %evicted_day, freed = evicted.len(), "evicted image");
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn get_or_set<'a>(
        &'a self,
        day: &'a str,
        fallback: ImageFuture<'a>,
    ) -> AppResult<ImageArtifact> {
        if let Some(found) = self.get(day).await {
            return Ok(found);
        }

        // Collapse concurrent misses: one resolver per day, everyone else
        // waits and re-checks.
        let gate = self.gate_for(day).await;
        let _guard = gate.lock().await;

        if let Some(found) = self.get(day).await {
            self.release_gate(day).await;
            return Ok(found);
        }

        let result = fallback.await;
        match result {
            Ok(artifact) => {
                if let Err(e) = self.set(day, artifact.clone()).await {
                    warn!(day, error = %e, "failed to cache resolved image");
                }
                self.release_gate(day).await;
                Ok(artifact)
            }
            Err(e) => {
                self.release_gate(day).await;
                Err(e)
            }
        }
    }
}

/// Cache that stores nothing. Every lookup resolves through the fallback.
#[derive(Default)]
pub struct DiscardImageCache;

impl DiscardImageCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageCache for DiscardImageCache {
    async fn get(&self, _day: &str) -> Option<ImageArtifact> {
        None
    }

    async fn set(&self, _day: &str, _artifact: ImageArtifact) -> AppResult<()> {
        Ok(())
    }
}
