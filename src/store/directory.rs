use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::KeyedStore;
use crate::errors::StoreError;

/// One-file-per-key backend over a directory.
///
/// Keys map to `<dir>/<key>.json`. Presence is tracked by a ready index
/// populated from a single directory listing at startup and kept current as
/// entries are added. A ready key whose file can no longer be read or parsed
/// is logged and served as a miss, not a failure.
pub struct DirectoryStore<T> {
    dir: PathBuf,
    ready: RwLock<HashSet<String>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DirectoryStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir).await?;

        let mut ready = HashSet::new();
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(".json") {
                ready.insert(key.to_string());
            }
        }

        info!(dir = %dir.display(), entries = ready.len(), "loaded directory store");
        Ok(Self {
            dir,
            ready: RwLock::new(ready),
            _marker: PhantomData,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub async fn len(&self) -> usize {
        self.ready.read().await.len()
    }
}

#[async_trait]
impl<T> KeyedStore<T> for DirectoryStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn add(&self, key: &str, value: T) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(&value)
            .map_err(|e| StoreError::serialize(key, e.to_string()))?;

        // Write the blob before marking the key ready.
        fs::write(self.path_for(key), encoded).await?;
        self.ready.write().await.insert(key.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<T> {
        if !self.ready.read().await.contains(key) {
            return None;
        }

        let data = match fs::read(self.path_for(key)).await {
            Ok(data) => data,
            Err(e) => {
                warn!(key, error = %e, "ready entry could not be read, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ready entry could not be parsed, treating as miss");
                None
            }
        }
    }

    async fn has(&self, key: &str) -> bool {
        self.ready.read().await.contains(key)
    }

    async fn keys(&self) -> Vec<String> {
        self.ready.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = DirectoryStore::open(dir.path().to_path_buf()).await.unwrap();
            store.add("2024-01-01", "hello".to_string()).await.unwrap();
        }

        let store: DirectoryStore<String> =
            DirectoryStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.has("2024-01-01").await);
        assert_eq!(store.get("2024-01-01").await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn ready_entry_with_missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().to_path_buf()).await.unwrap();
        store.add("2024-01-01", "hello".to_string()).await.unwrap();

        std::fs::remove_file(dir.path().join("2024-01-01.json")).unwrap();

        // Still listed as ready, but the read fails and degrades to a miss.
        assert!(store.has("2024-01-01").await);
        assert_eq!(store.get("2024-01-01").await, None::<String>);
    }

    #[tokio::test]
    async fn corrupt_blob_is_a_miss_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().to_path_buf()).await.unwrap();
        store.add("2024-01-01", "hello".to_string()).await.unwrap();

        std::fs::write(dir.path().join("2024-01-01.json"), b"{not json").unwrap();

        assert_eq!(store.get("2024-01-01").await, None::<String>);
    }
}
