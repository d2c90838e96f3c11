//! The notification sink boundary.
//!
//! The pipeline hands a resolved record and its delivery-ready image to a
//! sink and does not know the outbound wire format. The webhook
//! implementation is the production sink; tests substitute their own.

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::Record;
use crate::transcode::ImageArtifact;

pub mod webhook;

pub use webhook::WebhookSink;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one day's record and image to a channel
    async fn deliver(
        &self,
        channel_id: &str,
        record: &Record,
        image: &ImageArtifact,
    ) -> AppResult<()>;

    /// Whether the channel can still receive deliveries. Used to prune the
    /// schedule.
    async fn is_reachable(&self, channel_id: &str) -> bool;
}
