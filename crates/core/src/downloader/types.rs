//! Types for downloader gateway operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while talking to a downloader backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,
}

impl GatewayError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_connect() {
            GatewayError::ConnectionFailed(e.to_string())
        } else {
            GatewayError::ApiError(e.to_string())
        }
    }
}

/// Status cohort used when querying torrents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Fully downloaded (seeding or paused after completion).
    Completed,
    /// Not yet complete, whether active, queued or paused.
    Downloading,
    Any,
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::Completed => "completed",
            StatusFilter::Downloading => "downloading",
            StatusFilter::Any => "any",
        }
    }

    /// Whether a torrent with the given progress belongs to this cohort.
    pub fn admits(&self, progress_pct: f64) -> bool {
        match self {
            StatusFilter::Completed => progress_pct >= 100.0,
            StatusFilter::Downloading => progress_pct < 100.0,
            StatusFilter::Any => true,
        }
    }
}

/// Backend-independent view of a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentView {
    /// Backend id (info hash for both supported backends).
    pub id: String,
    pub name: String,
    pub added_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
    pub ratio: f64,
    pub total_size: u64,
    /// Progress in percent (0.0 - 100.0).
    pub progress_pct: f64,
}

/// Result of a status query. `has_error` means the list cannot be trusted.
#[derive(Debug, Clone, Default)]
pub struct TorrentQuery {
    pub torrents: Vec<TorrentView>,
    pub has_error: bool,
}

impl TorrentQuery {
    pub fn ok(torrents: Vec<TorrentView>) -> Self {
        Self {
            torrents,
            has_error: false,
        }
    }

    pub fn failed() -> Self {
        Self {
            torrents: Vec::new(),
            has_error: true,
        }
    }
}

/// Request to add a torrent.
#[derive(Debug, Clone, Default)]
pub struct AddTorrentRequest {
    /// Magnet URI or URL of the .torrent file. The backend fetches it.
    pub content_ref: String,
    /// Unique tag used to find the torrent after adding.
    pub tag: String,
    /// Additional tags/labels to attach.
    pub extra_tags: Vec<String>,
    /// Save directory override; falls back to the profile default.
    pub save_dir: Option<String>,
    /// Upload limit in KiB/s.
    pub upload_limit: Option<u64>,
    /// Download limit in KiB/s.
    pub download_limit: Option<u64>,
    /// Cookie sent when the backend fetches `content_ref`.
    pub cookie: Option<String>,
}

impl AddTorrentRequest {
    pub fn new(content_ref: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            content_ref: content_ref.into(),
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Tracking tag for torrents added on behalf of `owner`:
    /// `seedwarden-<owner>-<8 hex digits>`.
    pub fn tracking_tag(owner: &str) -> String {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        format!("seedwarden-{}-{}", owner, &unique[..8])
    }

    /// All tags to attach, tracking tag first.
    pub fn all_tags(&self) -> Vec<&str> {
        std::iter::once(self.tag.as_str())
            .chain(self.extra_tags.iter().map(String::as_str))
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Capability surface the engine needs from a download client.
///
/// Backends implement the `Result`-returning methods; the engine consumes
/// the provided wrappers, which turn errors into the `has_error` flag or
/// `None` so that a failed query is never mistaken for an empty one.
#[async_trait]
pub trait DownloaderGateway: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// List torrents among `ids` in the given cohort. `ids` is never empty.
    async fn list_torrents(
        &self,
        ids: &[String],
        filter: StatusFilter,
    ) -> Result<Vec<TorrentView>, GatewayError>;

    /// Add a torrent, returning its backend id once it is known.
    async fn add_torrent(&self, request: AddTorrentRequest)
        -> Result<Option<String>, GatewayError>;

    async fn start_torrents(&self, ids: &[String]) -> Result<(), GatewayError>;

    async fn stop_torrents(&self, ids: &[String]) -> Result<(), GatewayError>;

    async fn delete_torrents(&self, ids: &[String], delete_files: bool)
        -> Result<(), GatewayError>;

    /// Number of torrents currently downloading.
    async fn downloading_count(&self) -> Result<usize, GatewayError>;

    /// Query torrents by id and cohort, flagging backend failures.
    async fn get_torrents(&self, ids: &[String], filter: StatusFilter) -> TorrentQuery {
        if ids.is_empty() {
            return TorrentQuery::ok(Vec::new());
        }
        match self.list_torrents(ids, filter).await {
            Ok(torrents) => TorrentQuery::ok(torrents),
            Err(e) => {
                warn!(
                    "{} failed to list {} torrents: {}",
                    self.name(),
                    filter.as_str(),
                    e
                );
                TorrentQuery::failed()
            }
        }
    }

    /// Downloading count, or `None` when the backend is unreachable.
    async fn get_downloading_count(&self) -> Option<usize> {
        match self.downloading_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("{} failed to report downloading count: {}", self.name(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_admits() {
        assert!(StatusFilter::Completed.admits(100.0));
        assert!(!StatusFilter::Completed.admits(99.9));
        assert!(StatusFilter::Downloading.admits(0.0));
        assert!(!StatusFilter::Downloading.admits(100.0));
        assert!(StatusFilter::Any.admits(42.0));
    }

    #[test]
    fn test_all_tags_tracking_first() {
        let mut request = AddTorrentRequest::new("magnet:?xt=urn:btih:abc", "seedwarden-t1-1234abcd");
        request.extra_tags.push("organized".to_string());
        assert_eq!(request.all_tags(), vec!["seedwarden-t1-1234abcd", "organized"]);
    }

    #[test]
    fn test_torrent_query_constructors() {
        assert!(!TorrentQuery::ok(Vec::new()).has_error);
        assert!(TorrentQuery::failed().has_error);
    }

    #[test]
    fn test_tracking_tag_format() {
        let tag = AddTorrentRequest::tracking_tag("farm");
        assert!(tag.starts_with("seedwarden-farm-"));
        assert_eq!(tag.len(), "seedwarden-farm-".len() + 8);
        assert_ne!(tag, AddTorrentRequest::tracking_tag("farm"));
    }
}
