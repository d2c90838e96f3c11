use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::KeyedStore;
use crate::errors::StoreError;

/// One line of the append-only log: a self-describing (key, value) pair.
#[derive(Serialize, Deserialize)]
struct LogEntry<T> {
    key: String,
    value: T,
}

/// Append-only log backend.
///
/// The in-memory index is a pure fold of the log from the beginning;
/// replaying the file from empty reproduces the index exactly, with
/// last-write-wins per key. `add` appends and flushes the line before the
/// index is updated, so a crash in between loses the add rather than leaving
/// the index ahead of the log.
pub struct AppendLogStore<T> {
    index: RwLock<HashMap<String, T>>,
    writer: Mutex<File>,
}

impl<T> AppendLogStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) a log file and replay it into the index.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let existing = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let index = Self::replay(&existing)?;
        info!(path = %path.display(), entries = index.len(), "replayed append log");

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            index: RwLock::new(index),
            writer: Mutex::new(writer),
        })
    }

    /// Fold the log text into an index.
    ///
    /// A final line that is not valid JSON is a truncated partial write and is
    /// tolerated as end-of-stream. A complete line that parses as JSON but not
    /// as a `LogEntry<T>` means the log itself is inconsistent.
    fn replay(contents: &str) -> Result<HashMap<String, T>, StoreError> {
        let lines: Vec<(usize, &str)> = contents
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .collect();

        let mut index = HashMap::new();
        for (position, &(line_no, line)) in lines.iter().enumerate() {
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    if position == lines.len() - 1 {
                        warn!(line = line_no + 1, "dropping truncated final log line");
                        break;
                    }
                    return Err(StoreError::corrupt(line_no + 1, e.to_string()));
                }
            };

            let entry: LogEntry<T> = serde_json::from_value(value)
                .map_err(|e| StoreError::corrupt(line_no + 1, e.to_string()))?;
            index.insert(entry.key, entry.value);
        }
        Ok(index)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    async fn append_line(&self, encoded: String) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<T> KeyedStore<T> for AppendLogStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn add(&self, key: &str, value: T) -> Result<(), StoreError> {
        let entry = LogEntry {
            key: key.to_string(),
            value,
        };
        let encoded = serde_json::to_string(&entry)
            .map_err(|e| StoreError::serialize(key, e.to_string()))?;

        // Durable append first, memory second.
        self.append_line(encoded).await?;
        self.index.write().await.insert(entry.key, entry.value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<T> {
        self.index.read().await.get(key).cloned()
    }

    async fn has(&self, key: &str) -> bool {
        self.index.read().await.contains_key(key)
    }

    async fn keys(&self) -> Vec<String> {
        self.index.read().await.keys().cloned().collect()
    }
}
