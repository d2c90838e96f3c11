use serde::{Deserialize, Serialize};

/// Media kind reported by the upstream for a day's record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    #[serde(other)]
    Other,
}

/// One upstream response for a calendar date.
///
/// Records are immutable once fetched and keyed uniquely by `date`
/// (`YYYY-MM-DD`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub date: String,
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    pub url: String,
    #[serde(rename = "hdurl", default, skip_serializing_if = "Option::is_none")]
    pub hd_url: Option<String>,
    #[serde(rename = "media_type")]
    pub media_kind: MediaKind,
    #[serde(
        rename = "thumbnail_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(
        rename = "service_version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_version: Option<String>,
}

impl Record {
    /// The URL to download the day's binary image from.
    ///
    /// Image days prefer the high-resolution variant; video days only carry a
    /// still frame as a thumbnail.
    pub fn image_url(&self) -> Option<&str> {
        match self.media_kind {
            MediaKind::Image => self
                .hd_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .or(non_empty(&self.url)),
            MediaKind::Video | MediaKind::Other => self
                .thumbnail
                .as_deref()
                .filter(|u| !u.is_empty())
                .or(non_empty(&self.url)),
        }
    }

    /// Markdown-ish text body used by delivery
    pub fn formatted_explanation(&self) -> String {
        format!("_{}_\n> {}", self.title, self.explanation)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
