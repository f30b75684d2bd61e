//! RSS feed retrieval and parsing.
//!
//! `parse_feed` turns a tracker RSS document into [`FeedItem`]s, `FeedClient`
//! fetches and parses a feed URL, and [`SeenCache`] remembers which
//! enclosures a loop has already looked at.

mod client;
mod parser;
mod seen;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{FeedClient, HttpFeedClient};
pub use parser::parse_feed;
pub use seen::SeenCache;

/// Errors from fetching or parsing a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One entry of a tracker feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    /// Torrent file URL or magnet link. Identifies the item for dedup.
    pub enclosure_url: String,
    /// Details page on the tracker, if the feed provides one.
    pub detail_url: Option<String>,
    pub description: Option<String>,
    /// Declared size, 0 when unknown.
    pub size_bytes: u64,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn new(title: impl Into<String>, enclosure_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            enclosure_url: enclosure_url.into(),
            detail_url: None,
            description: None,
            size_bytes: 0,
            published_at: None,
        }
    }

    /// Text the include/exclude patterns are searched over.
    pub fn search_text(&self) -> String {
        match self.description.as_deref() {
            Some(description) => format!("{} {}", self.title, description),
            None => self.title.clone(),
        }
    }

    /// Hours since publication, if the publish date is known.
    pub fn age_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        self.published_at
            .map(|published| (now - published).num_seconds().max(0) as f64 / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_search_text() {
        let mut item = FeedItem::new("Show.S01E01", "https://e/1");
        assert_eq!(item.search_text(), "Show.S01E01");
        item.description = Some("Chinese subs".to_string());
        assert_eq!(item.search_text(), "Show.S01E01 Chinese subs");
    }

    #[test]
    fn test_age_hours_uses_full_duration() {
        let now = Utc::now();
        let mut item = FeedItem::new("x", "https://e/1");
        assert_eq!(item.age_hours(now), None);

        item.published_at = Some(now - Duration::days(2) - Duration::hours(3));
        let age = item.age_hours(now).unwrap();
        assert!((age - 51.0).abs() < 0.01);
    }
}
