//! Durable key/value stores.
//!
//! A [`KeyedStore`] holds one serializable value per string key. Three
//! backends exist and are selected at construction time: a volatile in-memory
//! map, a one-file-per-key directory, and an append-only log replayed into an
//! in-memory index at startup. All three follow a shared-read /
//! exclusive-write lock discipline, and the durable backends append or write
//! before touching their in-memory index so that memory never claims
//! durability the storage does not have.

use async_trait::async_trait;

use crate::errors::StoreError;

pub mod append;
pub mod directory;
pub mod memory;

pub use append::AppendLogStore;
pub use directory::DirectoryStore;
pub use memory::MemoryStore;

/// Minimal durable key/value contract.
///
/// `add` must make the value durable (where the backend has durability at
/// all) before it returns success; a crash in between loses the add entirely
/// rather than leaving the index ahead of storage.
#[async_trait]
pub trait KeyedStore<T: Send + Sync + 'static>: Send + Sync {
    async fn add(&self, key: &str, value: T) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Option<T>;

    async fn has(&self, key: &str) -> bool;

    /// All keys currently present
    async fn keys(&self) -> Vec<String>;

    /// Add a batch of entries, skipping keys that are already present.
    ///
    /// Not transactional: entries added before a failure stay visible, and
    /// the error is propagated so the caller can retry the remainder.
    async fn add_all(&self, entries: Vec<(String, T)>) -> Result<(), StoreError> {
        for (key, value) in entries {
            if self.has(&key).await {
                continue;
            }
            self.add(&key, value).await?;
        }
        Ok(())
    }
}
