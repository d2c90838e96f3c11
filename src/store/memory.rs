use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::KeyedStore;
use crate::errors::StoreError;

/// In-memory backend with no persistence. Useful for tests and for callers
/// that explicitly opt out of durability.
#[derive(Default)]
pub struct MemoryStore<T> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<T> KeyedStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn add(&self, key: &str, value: T) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<T> {
        self.entries.read().await.get(key).cloned()
    }

    async fn has(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_get_round_trip() {
        let store = MemoryStore::new();
        store.add("2024-01-01", 7u32).await.unwrap();

        assert!(store.has("2024-01-01").await);
        assert_eq!(store.get("2024-01-01").await, Some(7));
        assert_eq!(store.get("2024-01-02").await, None);
    }

    #[tokio::test]
    async fn add_all_skips_existing_keys() {
        let store = MemoryStore::new();
        store.add("a", 1u32).await.unwrap();

        store
            .add_all(vec![("a".to_string(), 99), ("b".to_string(), 2)])
            .await
            .unwrap();

        assert_eq!(store.get("a").await, Some(1));
        assert_eq!(store.get("b").await, Some(2));
    }
}
