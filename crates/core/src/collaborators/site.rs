use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Login required")]
    LoginRequired,
}

/// Torrent attributes read from a tracker details page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentAttributes {
    pub free: bool,
    pub double_free: bool,
    pub hit_and_run: bool,
    pub peer_count: Option<u32>,
}

impl TorrentAttributes {
    /// Upload/download factors implied by the promotion markers.
    pub fn factors(&self) -> (f64, f64) {
        if self.double_free {
            (2.0, 0.0)
        } else if self.free {
            (1.0, 0.0)
        } else {
            (1.0, 1.0)
        }
    }
}

/// Reads promotion and hit-and-run state for a torrent.
#[async_trait]
pub trait SiteProbe: Send + Sync {
    async fn probe(
        &self,
        detail_url: &str,
        cookie: Option<&str>,
    ) -> Result<TorrentAttributes, ProbeError>;
}

static PEERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(?:个做种者|seeders?\b|seeding\b)").expect("valid regex")
});

/// Probe that fetches the details page and scans it for NexusPHP-style
/// promotion classes (`pro_free`, `pro_free2up`), hit-and-run badges and
/// the seeder count.
pub struct HttpSiteProbe {
    client: Client,
}

impl HttpSiteProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

/// Scan a details page for torrent attributes.
pub(crate) fn scan_details_page(html: &str) -> TorrentAttributes {
    let lower = html.to_lowercase();
    let double_free = lower.contains("pro_free2up") || lower.contains("class=\"twoupfree\"");
    let free = double_free || lower.contains("pro_free") || lower.contains("class=\"free\"");
    let hit_and_run = ["hitandrun", "hit_run", "hit-and-run"]
        .iter()
        .any(|marker| lower.contains(marker));
    let peer_count = PEERS
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    TorrentAttributes {
        free,
        double_free,
        hit_and_run,
        peer_count,
    }
}

#[async_trait]
impl SiteProbe for HttpSiteProbe {
    async fn probe(
        &self,
        detail_url: &str,
        cookie: Option<&str>,
    ) -> Result<TorrentAttributes, ProbeError> {
        let mut request = self.client.get(detail_url);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError::Request(format!("HTTP {}", response.status())));
        }
        // trackers redirect to the login page when the cookie is stale
        if response.url().path().contains("login") {
            return Err(ProbeError::LoginRequired);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        let attrs = scan_details_page(&body);
        debug!("Probed {}: {:?}", detail_url, attrs);
        Ok(attrs)
    }
}
