use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::Upstream;
use crate::config::UpstreamConfig;
use crate::errors::FetchError;
use crate::models::Record;

/// HTTP adapter for the upstream picture-of-the-day API.
///
/// Maps transport failures and 5xx/429 responses to
/// [`FetchError::Transient`], 404 to [`FetchError::NotFound`], and payloads
/// that fail to parse to [`FetchError::Decode`].
pub struct HttpUpstream {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("potd-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::transient(e.to_string()))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::decode(format!("invalid base url: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn query_url(&self, pairs: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("thumbs", "true");
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
            query.append_pair("api_key", &self.api_key);
        }
        url
    }

    fn classify(status: StatusCode, date: Option<&str>) -> Option<FetchError> {
        if status.is_success() {
            return None;
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(date) = date {
                return Some(FetchError::not_found(date));
            }
        }
        Some(FetchError::transient(format!("upstream answered {status}")))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch_one(&self, date: &str) -> Result<Record, FetchError> {
        let url = self.query_url(&[("date", date)]);
        debug!(date, "fetching record");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;

        if let Some(err) = Self::classify(response.status(), Some(date)) {
            return Err(err);
        }

        response
            .json::<Record>()
            .await
            .map_err(|e| FetchError::decode(e.to_string()))
    }

    async fn fetch_range(&self, start: &str, end: &str) -> Result<Vec<Record>, FetchError> {
        let url = self.query_url(&[("start_date", start), ("end_date", end)]);
        debug!(start, end, "fetching record range");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;

        if let Some(err) = Self::classify(response.status(), None) {
            return Err(err);
        }

        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| FetchError::decode(e.to_string()))
    }

    async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!(url, "downloading binary");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;

        if let Some(err) = Self::classify(response.status(), None) {
            return Err(err);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
