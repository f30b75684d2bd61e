//! Transmission gateway (JSON-RPC).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::DownloaderProfile;

use super::{AddTorrentRequest, DownloaderGateway, GatewayError, StatusFilter, TorrentView};

const SESSION_HEADER: &str = "X-Transmission-Session-Id";

const TORRENT_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "addedDate",
    "doneDate",
    "uploadedEver",
    "downloadedEver",
    "uploadRatio",
    "totalSize",
    "percentDone",
    "status",
];

/// Transmission status codes for "download wait" and "downloading".
const STATUS_DOWNLOADING: &[i64] = &[3, 4];

/// Transmission gateway. Torrents are addressed by info hash.
pub struct TransmissionGateway {
    client: Client,
    profile: DownloaderProfile,
    session_id: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrTorrent {
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    added_date: i64,
    #[serde(default)]
    done_date: i64,
    #[serde(default)]
    uploaded_ever: i64,
    #[serde(default)]
    downloaded_ever: i64,
    #[serde(default)]
    upload_ratio: f64,
    #[serde(default)]
    total_size: i64,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    status: i64,
}

impl TrTorrent {
    fn into_view(self) -> TorrentView {
        TorrentView {
            id: self.hash_string.to_lowercase(),
            name: self.name,
            added_at: timestamp_to_datetime(self.added_date),
            completed_at: timestamp_to_datetime(self.done_date),
            uploaded_bytes: self.uploaded_ever.max(0) as u64,
            downloaded_bytes: self.downloaded_ever.max(0) as u64,
            // -1 means "not available", -2 means "infinite"
            ratio: self.upload_ratio.max(0.0),
            total_size: self.total_size.max(0) as u64,
            progress_pct: (self.percent_done * 100.0).clamp(0.0, 100.0),
        }
    }
}

fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

impl TransmissionGateway {
    pub fn new(profile: DownloaderProfile) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(profile.timeout_secs))
            .build()
            .map_err(|e| GatewayError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            profile,
            session_id: RwLock::new(None),
        })
    }

    fn rpc_url(&self) -> String {
        format!("{}/transmission/rpc", self.profile.base_url())
    }

    /// Call an RPC method, negotiating the session id on 409.
    async fn rpc(&self, method: &str, arguments: Value) -> Result<Value, GatewayError> {
        let payload = json!({ "method": method, "arguments": arguments });
        let url = self.rpc_url();

        for _ in 0..2 {
            let mut request = self.client.post(&url).json(&payload);
            if !self.profile.username.is_empty() {
                request = request.basic_auth(&self.profile.username, Some(&self.profile.password));
            }
            if let Some(id) = self.session_id.read().await.as_deref() {
                request = request.header(SESSION_HEADER, id);
            }

            let response = request.send().await.map_err(GatewayError::from_reqwest)?;
            let status = response.status();

            if status == StatusCode::CONFLICT {
                let id = response
                    .headers()
                    .get(SESSION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                debug!("Transmission session id renewed");
                *self.session_id.write().await = id;
                continue;
            }
            if status == StatusCode::UNAUTHORIZED {
                return Err(GatewayError::AuthenticationFailed(
                    "Invalid credentials".to_string(),
                ));
            }
            if !status.is_success() {
                return Err(GatewayError::ApiError(format!("HTTP {}", status)));
            }

            let body: RpcResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            if body.result != "success" {
                return Err(GatewayError::ApiError(body.result));
            }
            return Ok(body.arguments);
        }

        Err(GatewayError::AuthenticationFailed(
            "Session id negotiation failed".to_string(),
        ))
    }

    async fn torrent_get(&self, ids: Option<&[String]>) -> Result<Vec<TrTorrent>, GatewayError> {
        let mut arguments = json!({ "fields": TORRENT_FIELDS });
        if let Some(ids) = ids {
            arguments["ids"] = json!(ids);
        }
        let result = self.rpc("torrent-get", arguments).await?;
        let torrents = result.get("torrents").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(torrents)
            .map_err(|e| GatewayError::InvalidResponse(format!("Failed to parse torrent list: {}", e)))
    }
}

/// Arguments for `torrent-add`.
fn add_arguments(request: &AddTorrentRequest, default_dir: Option<&str>) -> Value {
    let mut arguments = json!({
        "filename": request.content_ref,
        "paused": true,
        "labels": request.all_tags(),
    });
    if let Some(dir) = request.save_dir.as_deref().or(default_dir) {
        arguments["download-dir"] = json!(dir);
    }
    if let Some(cookie) = request.cookie.as_deref() {
        arguments["cookies"] = json!(cookie);
    }
    arguments
}

/// Arguments for the `torrent-set` call applying limits. Limits are KiB/s.
fn limit_arguments(id: &str, request: &AddTorrentRequest) -> Option<Value> {
    let mut arguments = json!({ "ids": [id] });
    let mut any = false;
    if let Some(limit) = request.upload_limit.filter(|l| *l > 0) {
        arguments["uploadLimit"] = json!(limit);
        arguments["uploadLimited"] = json!(true);
        any = true;
    }
    if let Some(limit) = request.download_limit.filter(|l| *l > 0) {
        arguments["downloadLimit"] = json!(limit);
        arguments["downloadLimited"] = json!(true);
        any = true;
    }
    any.then_some(arguments)
}

#[async_trait]
impl DownloaderGateway for TransmissionGateway {
    fn name(&self) -> &str {
        self.profile.display_name()
    }

    async fn list_torrents(
        &self,
        ids: &[String],
        filter: StatusFilter,
    ) -> Result<Vec<TorrentView>, GatewayError> {
        let torrents = self.torrent_get(Some(ids)).await?;
        Ok(torrents
            .into_iter()
            .map(TrTorrent::into_view)
            .filter(|view| filter.admits(view.progress_pct))
            .collect())
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<Option<String>, GatewayError> {
        let arguments = add_arguments(&request, self.profile.default_save_dir.as_deref());
        let result = self.rpc("torrent-add", arguments).await?;

        if result.get("torrent-duplicate").is_some() {
            warn!("Transmission already has torrent {}", request.content_ref);
            return Ok(None);
        }

        let Some(id) = result
            .get("torrent-added")
            .and_then(|t| t.get("hashString"))
            .and_then(Value::as_str)
            .map(str::to_lowercase)
        else {
            return Ok(None);
        };

        if let Some(arguments) = limit_arguments(&id, &request) {
            self.rpc("torrent-set", arguments).await?;
        }
        Ok(Some(id))
    }

    async fn start_torrents(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.rpc("torrent-start", json!({ "ids": ids })).await?;
        Ok(())
    }

    async fn stop_torrents(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.rpc("torrent-stop", json!({ "ids": ids })).await?;
        Ok(())
    }

    async fn delete_torrents(&self, ids: &[String], delete_files: bool) -> Result<(), GatewayError> {
        self.rpc(
            "torrent-remove",
            json!({ "ids": ids, "delete-local-data": delete_files }),
        )
        .await?;
        Ok(())
    }

    async fn downloading_count(&self) -> Result<usize, GatewayError> {
        let torrents = self.torrent_get(None).await?;
        Ok(torrents
            .iter()
            .filter(|t| STATUS_DOWNLOADING.contains(&t.status))
            .count())
    }
}
