use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::backfill::BackfillOptions;
use crate::errors::AppError;
use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
    pub delivery: DeliveryConfig,
    pub backfill: BackfillConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub record_log_path: PathBuf,
    pub schedule_log_path: PathBuf,
    pub image_cache_dir: PathBuf,
    pub image_cache: ImageCacheKind,
    /// Capacity of the bounded in-memory image cache, in bytes
    pub memory_cache_bytes: usize,
}

/// Which image cache variant to construct at startup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageCacheKind {
    Directory,
    Memory,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Hard ceiling on delivered image size, in bytes
    pub image_budget_bytes: usize,
    pub webhook_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Earliest date the upstream has data for (`YYYY-MM-DD`)
    pub first_date: String,
    pub range_cap_days: i64,
    pub batch_pause_seconds: u64,
    pub item_pause_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_seconds: u64,
    pub retry_max_backoff_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: "https://api.example.com/v1/potd".to_string(),
                api_key: "CHANGE_ME".to_string(),
                timeout_seconds: 30,
            },
            storage: StorageConfig {
                record_log_path: PathBuf::from("./data/records.log"),
                schedule_log_path: PathBuf::from("./data/schedule.log"),
                image_cache_dir: PathBuf::from("./data/images"),
                image_cache: ImageCacheKind::Directory,
                memory_cache_bytes: 100 * 1024 * 1024,
            },
            delivery: DeliveryConfig {
                image_budget_bytes: 8 * 1024 * 1024,
                webhook_timeout_seconds: 30,
            },
            backfill: BackfillConfig {
                first_date: "1995-06-16".to_string(),
                range_cap_days: 30,
                batch_pause_seconds: 5,
                item_pause_seconds: 1,
            },
            scheduler: SchedulerConfig {
                retry_max_attempts: 5,
                retry_initial_backoff_seconds: 1,
                retry_max_backoff_seconds: 60,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all("./data")?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}

impl BackfillConfig {
    pub fn options(&self) -> Result<BackfillOptions, AppError> {
        let first_date = crate::utils::parse_day(&self.first_date).ok_or_else(|| {
            AppError::configuration(format!("invalid backfill.first_date: {}", self.first_date))
        })?;
        Ok(BackfillOptions {
            first_date,
            range_cap_days: self.range_cap_days,
            batch_pause: Duration::from_secs(self.batch_pause_seconds),
            item_pause: Duration::from_secs(self.item_pause_seconds),
        })
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: Duration::from_secs(self.retry_initial_backoff_seconds),
            max_backoff: Duration::from_secs(self.retry_max_backoff_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = Config::default();
        let encoded = toml::to_string_pretty(&config).unwrap();
        let decoded: Config = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.storage.image_cache, ImageCacheKind::Directory);
        assert_eq!(decoded.delivery.image_budget_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn invalid_first_date_is_a_configuration_error() {
        let mut config = Config::default();
        config.backfill.first_date = "June 16th".to_string();
        assert!(config.backfill.options().is_err());
    }
}
