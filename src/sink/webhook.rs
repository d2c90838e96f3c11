use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::debug;

use super::DeliverySink;
use crate::errors::{AppError, AppResult};
use crate::models::Record;
use crate::transcode::ImageArtifact;

/// Webhook delivery sink.
///
/// A channel id is the webhook URL itself. Deliveries are multipart POSTs:
/// a `content` text field with the formatted record and the image attached
/// under a date-based filename.
pub struct WebhookSink {
    client: Client,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("potd-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::internal(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(
        &self,
        channel_id: &str,
        record: &Record,
        image: &ImageArtifact,
    ) -> AppResult<()> {
        let filename = format!("{}.{}", record.date, image.format().extension());
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(filename)
            .mime_str(image.format().mime_type())
            .map_err(|e| AppError::delivery(channel_id, e.to_string()))?;

        let form = Form::new()
            .text("content", record.formatted_explanation())
            .part("file", part);

        let response = self
            .client
            .post(channel_id)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::delivery(channel_id, e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::delivery(
                channel_id,
                format!("webhook answered {}", response.status()),
            ));
        }

        debug!(channel = channel_id, date = %record.date, "delivered");
        Ok(())
    }

    async fn is_reachable(&self, channel_id: &str) -> bool {
        match self.client.get(channel_id).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
