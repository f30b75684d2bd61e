//! qBittorrent gateway (WebUI API v2).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::DownloaderProfile;

use super::{AddTorrentRequest, DownloaderGateway, GatewayError, StatusFilter, TorrentView};

/// qBittorrent gateway.
///
/// The session cookie lives in the client's cookie jar; a 403 response
/// clears the session and the request is retried once after logging in.
pub struct QBittorrentGateway {
    client: Client,
    profile: DownloaderProfile,
    authenticated: RwLock<bool>,
    lookup_attempts: u32,
    lookup_delay: Duration,
}

impl QBittorrentGateway {
    pub fn new(profile: DownloaderProfile) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(profile.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            profile,
            authenticated: RwLock::new(false),
            lookup_attempts: 5,
            lookup_delay: Duration::from_secs(5),
        })
    }

    /// Set how often and how long to wait for an added torrent to appear.
    pub fn with_lookup_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.lookup_attempts = attempts.max(1);
        self.lookup_delay = delay;
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2{}", self.profile.base_url(), endpoint)
    }

    async fn login(&self) -> Result<(), GatewayError> {
        let params = [
            ("username", self.profile.username.as_str()),
            ("password", self.profile.password.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/auth/login"))
            .form(&params)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login to {} successful", self.profile.display_name());
            *self.authenticated.write().await = true;
            Ok(())
        } else if body.contains("Fails.") || status == StatusCode::FORBIDDEN {
            Err(GatewayError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(GatewayError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), GatewayError> {
        if *self.authenticated.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Send a request built by `build`, re-authenticating once on 403.
    async fn send<F>(&self, build: F) -> Result<String, GatewayError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        self.ensure_authenticated().await?;

        let mut response = build(&self.client)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, re-authenticating");
            *self.authenticated.write().await = false;
            self.login().await?;
            response = build(&self.client)
                .send()
                .await
                .map_err(GatewayError::from_reqwest)?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::ApiError(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn post_form(&self, endpoint: &str, params: &[(&str, String)]) -> Result<String, GatewayError> {
        let url = self.url(endpoint);
        self.send(|client| client.post(&url).form(params)).await
    }

    async fn torrent_info(&self, query: &[(&str, String)]) -> Result<Vec<QbTorrent>, GatewayError> {
        let url = self.url("/torrents/info");
        let body = self.send(|client| client.get(&url).query(query)).await?;
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(format!("Failed to parse torrent list: {}", e)))
    }

    /// Poll for the torrent carrying `tag`; qBittorrent adds asynchronously.
    async fn find_by_tag(&self, tag: &str) -> Result<Option<String>, GatewayError> {
        for attempt in 0..self.lookup_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.lookup_delay).await;
            }
            let found = self.torrent_info(&[("tag", tag.to_string())]).await?;
            if let Some(torrent) = found.into_iter().next() {
                return Ok(Some(torrent.hash.to_lowercase()));
            }
            debug!("Torrent tagged '{}' not visible yet (attempt {})", tag, attempt + 1);
        }
        Ok(None)
    }
}

/// Torrent entry of `/torrents/info`.
#[derive(Debug, Deserialize)]
struct QbTorrent {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    total_size: i64,
    #[serde(default)]
    downloaded: i64,
    #[serde(default)]
    uploaded: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    added_on: i64,
    #[serde(default)]
    completion_on: i64,
}

impl QbTorrent {
    fn into_view(self) -> TorrentView {
        let total = if self.total_size > 0 { self.total_size } else { self.size };
        TorrentView {
            id: self.hash.to_lowercase(),
            name: self.name,
            added_at: timestamp_to_datetime(self.added_on),
            completed_at: timestamp_to_datetime(self.completion_on),
            uploaded_bytes: self.uploaded.max(0) as u64,
            downloaded_bytes: self.downloaded.max(0) as u64,
            ratio: self.ratio.max(0.0),
            total_size: total.max(0) as u64,
            progress_pct: (self.progress * 100.0).clamp(0.0, 100.0),
        }
    }
}

/// Convert a Unix timestamp to `DateTime<Utc>`; non-positive means unset.
fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

/// `filter` query value for a cohort.
fn cohort_filter(filter: StatusFilter) -> Option<&'static str> {
    match filter {
        StatusFilter::Completed => Some("completed"),
        StatusFilter::Downloading => Some("downloading"),
        StatusFilter::Any => None,
    }
}

fn join_hashes(ids: &[String]) -> String {
    ids.iter()
        .map(|id| id.to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

fn add_form(request: &AddTorrentRequest, default_dir: Option<&str>) -> multipart::Form {
    let mut form = multipart::Form::new()
        .text("urls", request.content_ref.clone())
        .text("tags", request.all_tags().join(","))
        .text("paused", "true")
        .text("stopped", "true");

    if let Some(dir) = request.save_dir.as_deref().or(default_dir) {
        form = form.text("savepath", dir.to_string());
    }
    if let Some(limit) = request.upload_limit.filter(|l| *l > 0) {
        form = form.text("upLimit", (limit * 1024).to_string());
    }
    if let Some(limit) = request.download_limit.filter(|l| *l > 0) {
        form = form.text("dlLimit", (limit * 1024).to_string());
    }
    if let Some(cookie) = request.cookie.as_deref() {
        form = form.text("cookie", cookie.to_string());
    }
    form
}

#[async_trait]
impl DownloaderGateway for QBittorrentGateway {
    fn name(&self) -> &str {
        self.profile.display_name()
    }

    async fn list_torrents(
        &self,
        ids: &[String],
        filter: StatusFilter,
    ) -> Result<Vec<TorrentView>, GatewayError> {
        let mut query = vec![("hashes", join_hashes(ids))];
        if let Some(value) = cohort_filter(filter) {
            query.push(("filter", value.to_string()));
        }

        let torrents = self.torrent_info(&query).await?;
        Ok(torrents.into_iter().map(QbTorrent::into_view).collect())
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<Option<String>, GatewayError> {
        let url = self.url("/torrents/add");
        let default_dir = self.profile.default_save_dir.as_deref();
        let body = self
            .send(|client| client.post(&url).multipart(add_form(&request, default_dir)))
            .await?;

        if body.contains("Fails.") {
            warn!(
                "qBittorrent rejected torrent {} (duplicate or invalid link)",
                request.content_ref
            );
            return Ok(None);
        }

        self.find_by_tag(&request.tag).await
    }

    async fn start_torrents(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.post_form("/torrents/resume", &[("hashes", join_hashes(ids))])
            .await?;
        Ok(())
    }

    async fn stop_torrents(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.post_form("/torrents/pause", &[("hashes", join_hashes(ids))])
            .await?;
        Ok(())
    }

    async fn delete_torrents(&self, ids: &[String], delete_files: bool) -> Result<(), GatewayError> {
        self.post_form(
            "/torrents/delete",
            &[
                ("hashes", join_hashes(ids)),
                ("deleteFiles", delete_files.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn downloading_count(&self) -> Result<usize, GatewayError> {
        let torrents = self
            .torrent_info(&[("filter", "downloading".to_string())])
            .await?;
        Ok(torrents.len())
    }
}
