//! Per-video state rows and catalog metadata.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Catalog metadata for one video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoMeta {
    pub title: String,
    pub channel_id: Option<String>,
    pub channel_name: String,
    /// `YYYY-MM-DD` when the catalog provides a full timestamp, best effort otherwise.
    pub published: String,
}

/// Link status of a video in the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// A mirror link was created or confirmed by the last reconciliation pass.
    Linked,
    /// A mirror link exists but its target is gone.
    Missing,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Linked => "linked",
            VideoStatus::Missing => "missing",
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linked" => Ok(VideoStatus::Linked),
            "missing" => Ok(VideoStatus::Missing),
            other => Err(format!("unknown video status: {}", other)),
        }
    }
}

/// One row of the state table, keyed by `video_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    pub published: String,
    pub symlink_path: String,
    pub status: VideoStatus,
    /// RFC 3339 UTC timestamp of the last write
    pub last_updated: String,
}

impl VideoRecord {
    /// Row written by the reconciler for a matched catalog id.
    pub fn linked(video_id: &str, meta: &VideoMeta, symlink_path: &Path) -> Self {
        Self {
            video_id: video_id.to_string(),
            title: meta.title.clone(),
            channel: meta.channel_name.clone(),
            published: meta.published.clone(),
            symlink_path: symlink_path.to_string_lossy().to_string(),
            status: VideoStatus::Linked,
            last_updated: now_rfc3339(),
        }
    }
}

/// Aggregate counts over the state table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: u64,
    pub linked: u64,
    pub missing: u64,
}

/// One page of a paged query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page as u64)
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [VideoStatus::Linked, VideoStatus::Missing] {
            assert_eq!(status.as_str().parse::<VideoStatus>(), Ok(status));
        }
        assert!("gone".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&VideoStatus::Missing).unwrap();
        assert_eq!(json, "\"missing\"");
    }

    #[test]
    fn test_page_count() {
        let page: Page<u8> = Page {
            items: vec![],
            page: 1,
            per_page: 20,
            total: 41,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
