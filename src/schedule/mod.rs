//! Event-sourced schedule store.
//!
//! The append-only event log is the source of truth. Two derived maps
//! (channel -> delivery hour, channel -> last-sent date) are rebuilt by a
//! full replay at startup and updated incrementally alongside each append.
//! Reducers are pure, so a replay of the log always reaches the same state
//! the live process had.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::errors::StoreError;

/// A schedule state change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    /// Register (or re-register) a channel for a UTC delivery hour
    Set { channel_id: String, hour: u8 },
    /// Unregister a channel
    Remove { channel_id: String },
    /// A delivery for a date reached a channel
    Sent { channel_id: String, date: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    fn now(kind: EventKind) -> Self {
        Self {
            time: Utc::now(),
            kind,
        }
    }
}

/// Derived state: a pure fold of the event log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleState {
    /// channel -> hour of day (UTC) to deliver at
    schedule: HashMap<String, u8>,
    /// channel -> date of the last delivery
    last_sent: HashMap<String, String>,
}

impl ScheduleState {
    pub fn apply(&mut self, kind: &EventKind) {
        match kind {
            EventKind::Set { channel_id, hour } => {
                self.schedule.insert(channel_id.clone(), *hour);
            }
            EventKind::Remove { channel_id } => {
                self.schedule.remove(channel_id);
            }
            EventKind::Sent { channel_id, date } => {
                self.last_sent.insert(channel_id.clone(), date.clone());
            }
        }
    }

    pub fn hour_for(&self, channel_id: &str) -> Option<u8> {
        self.schedule.get(channel_id).copied()
    }

    pub fn last_sent(&self, channel_id: &str) -> Option<&str> {
        self.last_sent.get(channel_id).map(String::as_str)
    }

    /// Channels registered for the given hour
    pub fn channels_for_hour(&self, hour: u8) -> Vec<String> {
        self.schedule
            .iter()
            .filter(|(_, &h)| h == hour)
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, u8)> {
        self.schedule.iter().map(|(c, &h)| (c.as_str(), h))
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty()
    }
}

/// Durable schedule store.
///
/// Every mutation appends its event to the log before the in-memory state is
/// updated; an append failure propagates and leaves memory untouched.
pub struct ScheduleStore {
    writer: Mutex<File>,
    state: RwLock<ScheduleState>,
}

impl ScheduleStore {
    /// Open (or create) the event log and replay it.
    ///
    /// Replay applies events strictly in log order. A truncated final line
    /// (a crash mid-append) is tolerated as end-of-stream; any other
    /// malformed or unknown event fails the load, because it means the
    /// durable log itself is inconsistent.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let state = Self::replay(&contents)?;
        info!(path = %path.display(), channels = state.len(), "replayed schedule log");

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            writer: Mutex::new(writer),
            state: RwLock::new(state),
        })
    }

    fn replay(contents: &str) -> Result<ScheduleState, StoreError> {
        let lines: Vec<(usize, &str)> = contents
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .collect();

        let mut state = ScheduleState::default();
        for (position, &(line_no, line)) in lines.iter().enumerate() {
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(e) => {
                    if position == lines.len() - 1 {
                        warn!(line = line_no + 1, "dropping truncated final event");
                        break;
                    }
                    return Err(StoreError::corrupt(line_no + 1, e.to_string()));
                }
            };

            let event: Event = serde_json::from_value(value)
                .map_err(|e| StoreError::corrupt(line_no + 1, e.to_string()))?;
            state.apply(&event.kind);
        }
        Ok(state)
    }

    async fn append(&self, event: &Event) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(event)
            .map_err(|e| StoreError::serialize("event", e.to_string()))?;

        let mut writer = self.writer.lock().await;
        writer.write_all(encoded.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn record(&self, kind: EventKind) -> Result<(), StoreError> {
        let event = Event::now(kind);
        // Durable append first, memory second.
        self.append(&event).await?;
        self.state.write().await.apply(&event.kind);
        Ok(())
    }

    /// Register a channel for a UTC delivery hour. Re-registering overwrites
    /// the previous hour.
    pub async fn set(&self, channel_id: &str, hour: u8) -> Result<(), StoreError> {
        self.record(EventKind::Set {
            channel_id: channel_id.to_string(),
            hour,
        })
        .await
    }

    /// Unregister a channel. Unregistering an unknown channel is a no-op,
    /// not an error.
    pub async fn remove(&self, channel_id: &str) -> Result<(), StoreError> {
        self.record(EventKind::Remove {
            channel_id: channel_id.to_string(),
        })
        .await
    }

    /// Mark a delivery as completed. Never touches the schedule map.
    pub async fn sent(&self, channel_id: &str, date: &str) -> Result<(), StoreError> {
        self.record(EventKind::Sent {
            channel_id: channel_id.to_string(),
            date: date.to_string(),
        })
        .await
    }

    /// Remove every channel the predicate matches, logging one `Remove`
    /// event per removal so a replay reaches the same end state.
    pub async fn remove_if(
        &self,
        predicate: impl Fn(&str, u8) -> bool,
    ) -> Result<usize, StoreError> {
        let matching: Vec<String> = {
            let state = self.state.read().await;
            state
                .channels()
                .filter(|(channel, hour)| predicate(channel, *hour))
                .map(|(channel, _)| channel.to_string())
                .collect()
        };

        for channel in &matching {
            self.remove(channel).await?;
            info!(channel, "pruned channel from schedule");
        }
        Ok(matching.len())
    }

    pub async fn last_delivered(&self, channel_id: &str) -> Option<String> {
        self.state
            .read()
            .await
            .last_sent(channel_id)
            .map(str::to_string)
    }

    /// A point-in-time copy of the derived state
    pub async fn snapshot(&self) -> ScheduleState {
        self.state.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }
}
