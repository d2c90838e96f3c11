//! The upstream fetch capability.
//!
//! The pipeline consumes the upstream as three opaque operations; URL
//! construction and credentials live behind the trait.

use async_trait::async_trait;

use crate::errors::FetchError;
use crate::models::Record;

pub mod http;

pub use http::HttpUpstream;

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch the record for a single date (`YYYY-MM-DD`)
    async fn fetch_one(&self, date: &str) -> Result<Record, FetchError>;

    /// Fetch every record in `[start, end]`, both inclusive
    async fn fetch_range(&self, start: &str, end: &str) -> Result<Vec<Record>, FetchError>;

    /// Download a binary payload (the day's image)
    async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}
