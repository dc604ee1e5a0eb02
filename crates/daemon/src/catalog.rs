//! Paginated client for the remote video catalog.
//!
//! The catalog answers `GET {base}/video/?page=N` with
//! `{"data": [...], "paginate": {"current_page": N, "last_page": M}}`.
//! Pagination stops at the first empty page, at the last page, or at the
//! first failing request; whatever was collected until then is returned.

use crate::record::VideoMeta;
use crate::config::CatalogConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Catalog page {page} could not be decoded: {reason}")]
    Decode { page: u32, reason: String },
}

#[derive(Debug, Deserialize)]
pub struct Paginate {
    pub current_page: Option<u64>,
    pub last_page: Option<u64>,
}

/// One decoded catalog page.
#[derive(Debug, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    pub paginate: Option<Paginate>,
}

impl CatalogPage {
    /// True when no further page should be requested after this one.
    pub fn is_terminal(&self) -> bool {
        if self.data.is_empty() {
            return true;
        }
        match &self.paginate {
            Some(Paginate {
                current_page: Some(current),
                last_page: Some(last),
            }) => current >= last,
            _ => false,
        }
    }
}

/// Result of one full catalog fetch.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    pub videos: HashMap<String, VideoMeta>,
    pub pages_fetched: u32,
    /// Entries dropped because they carried no id
    pub skipped_entries: usize,
    /// Set when pagination stopped on a failure; `videos` is then partial
    pub error: Option<String>,
}

impl CatalogSnapshot {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Normalize a catalog publish timestamp into a folder-friendly date.
///
/// Full timestamps are cut to their first ten characters (`YYYY-MM-DD`);
/// shorter values are kept. `/` becomes `-` either way.
pub fn normalize_published(raw: &str) -> String {
    let trimmed = raw.trim();
    let date: String = if trimmed.chars().count() >= 10 {
        trimmed.chars().take(10).collect()
    } else {
        trimmed.to_string()
    };
    date.replace('/', "-")
}

/// Non-blank string at `key`; any other JSON type counts as absent.
fn text_field<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Turn one raw entry into `(id, meta)`; `None` when the entry has no usable id.
///
/// Only the id decides whether an entry is kept. Other fields with an
/// unexpected shape fall back to their defaults.
pub fn parse_entry(value: &serde_json::Value) -> Option<(String, VideoMeta)> {
    let id = text_field(value, "youtube_id").or_else(|| text_field(value, "video_id"))?;

    let channel = value.get("channel").filter(|c| c.is_object());
    let channel_id = channel
        .and_then(|c| text_field(c, "channel_id"))
        .map(str::to_string);
    let channel_name = channel
        .and_then(|c| text_field(c, "channel_name").or_else(|| text_field(c, "channel_title")))
        .unwrap_or("Unknown Channel")
        .to_string();

    let published = text_field(value, "published")
        .map(normalize_published)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown_date".to_string());

    let title = text_field(value, "title").unwrap_or("unknown_title").to_string();

    Some((
        id.to_string(),
        VideoMeta {
            title,
            channel_id,
            channel_name,
            published,
        },
    ))
}

/// HTTP client for the catalog API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_pages: u32,
}

impl CatalogClient {
    pub fn new(cfg: &CatalogConfig) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            max_pages: cfg.max_pages.max(1),
        })
    }

    pub fn page_url(&self, page: u32) -> String {
        format!("{}/video/?page={}", self.base_url, page)
    }

    /// Fetch a single page.
    pub async fn fetch_page(&self, page: u32) -> Result<CatalogPage, CatalogError> {
        let response = self
            .http
            .get(self.page_url(page))
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| CatalogError::Decode {
            page,
            reason: e.to_string(),
        })
    }

    /// Walk every page and collect the id → metadata map.
    ///
    /// Never retries: the first failing page ends the walk and the entries
    /// gathered so far are returned with `error` set.
    pub async fn fetch_all(&self) -> CatalogSnapshot {
        let mut snapshot = CatalogSnapshot::default();
        let mut page = 1u32;

        loop {
            if page > self.max_pages {
                log::warn!("Catalog pagination hit the {} page ceiling", self.max_pages);
                break;
            }

            let body = match self.fetch_page(page).await {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("Catalog fetch stopped at page {}: {}", page, e);
                    snapshot.error = Some(format!("page {}: {}", page, e));
                    break;
                }
            };
            snapshot.pages_fetched += 1;

            for value in &body.data {
                match parse_entry(value) {
                    Some((id, meta)) => {
                        snapshot.videos.insert(id, meta);
                    }
                    None => snapshot.skipped_entries += 1,
                }
            }

            if body.is_terminal() {
                break;
            }
            page += 1;
        }

        snapshot
    }
}
