use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::brush::BrushTask;
use crate::filter::FilterRuleGroup;
use crate::subscription::Subscription;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub downloaders: Vec<DownloaderProfile>,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub filter_groups: Vec<FilterRuleGroup>,
    #[serde(default)]
    pub brush_tasks: Vec<BrushTask>,
    /// Subscriptions upserted into the repository at startup.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl Config {
    pub fn site(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == id)
    }

    pub fn downloader(&self, id: &str) -> Option<&DownloaderProfile> {
        self.downloaders.iter().find(|d| d.id == id)
    }

    pub fn brush_task(&self, id: &str) -> Option<&BrushTask> {
        self.brush_tasks.iter().find(|t| t.id == id)
    }
}

/// Server configuration (health and metrics endpoints)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    9797
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("seedwarden.db")
}

/// Engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Capacity of each task's in-memory seen-enclosure cache.
    #[serde(default = "default_seen_cache_capacity")]
    pub seen_cache_capacity: usize,
    #[serde(default = "default_subscription_interval")]
    pub subscription_interval_minutes: u64,
    #[serde(default = "default_lifecycle_interval")]
    pub lifecycle_interval_minutes: u64,
    /// Timeout for feed and detail page requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Master switch for notifications.
    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seen_cache_capacity: default_seen_cache_capacity(),
            subscription_interval_minutes: default_subscription_interval(),
            lifecycle_interval_minutes: default_lifecycle_interval(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            notifications: default_notifications(),
        }
    }
}

fn default_seen_cache_capacity() -> usize {
    4096
}

fn default_subscription_interval() -> u64 {
    30
}

fn default_lifecycle_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("seedwarden/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_notifications() -> bool {
    true
}

/// Supported download client backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Qbittorrent,
    Transmission,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Qbittorrent => "qbittorrent",
            BackendKind::Transmission => "transmission",
        }
    }
}

/// A download client the engine can drive
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub backend_kind: BackendKind,
    /// Host name, or a full base URL such as `https://qb.example.com`.
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub default_save_dir: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl DownloaderProfile {
    /// Base URL without trailing slash.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.contains("://") {
            format!("{}:{}", host, self.port)
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A tracker site
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rss_url: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Whether subscription matching may probe detail pages.
    #[serde(default)]
    pub parse_details: bool,
    /// Default filter group for items from this site.
    #[serde(default)]
    pub filter_rule: Option<String>,
    /// Preference when the same item is offered by several sites.
    #[serde(default)]
    pub order: i32,
}

impl SiteConfig {
    pub fn feed_url(&self) -> Option<&str> {
        self.rss_url.as_deref().filter(|u| !u.trim().is_empty())
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub downloaders: Vec<SanitizedDownloader>,
    pub sites: Vec<SanitizedSite>,
    pub filter_groups: usize,
    pub brush_tasks: usize,
    pub subscriptions: usize,
}

/// Downloader profile with the password hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDownloader {
    pub id: String,
    pub backend: String,
    pub url: String,
    pub username: String,
    pub password_configured: bool,
}

/// Site with feed URL and cookie hidden (both carry credentials)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSite {
    pub id: String,
    pub name: String,
    pub rss_configured: bool,
    pub cookie_configured: bool,
    pub parse_details: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            downloaders: config
                .downloaders
                .iter()
                .map(|d| SanitizedDownloader {
                    id: d.id.clone(),
                    backend: d.backend_kind.as_str().to_string(),
                    url: d.base_url(),
                    username: d.username.clone(),
                    password_configured: !d.password.is_empty(),
                })
                .collect(),
            sites: config
                .sites
                .iter()
                .map(|s| SanitizedSite {
                    id: s.id.clone(),
                    name: s.display_name().to_string(),
                    rss_configured: s.feed_url().is_some(),
                    cookie_configured: s.cookie().is_some(),
                    parse_details: s.parse_details,
                })
                .collect(),
            filter_groups: config.filter_groups.len(),
            brush_tasks: config.brush_tasks.len(),
            subscriptions: config.subscriptions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 9797);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "seedwarden.db");
        assert_eq!(config.engine.seen_cache_capacity, 4096);
        assert!(config.brush_tasks.is_empty());
    }

    #[test]
    fn test_deserialize_downloader_and_site() {
        let toml = r#"
[[downloaders]]
id = "qb"
backend_kind = "qbittorrent"
host = "localhost"
port = 8080
username = "admin"
password = "secret"

[[sites]]
id = "site-a"
rss_url = "https://tracker.example/rss?passkey=abc"
cookie = "uid=1; pass=x"
parse_details = true
order = 2
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let qb = config.downloader("qb").unwrap();
        assert_eq!(qb.backend_kind, BackendKind::Qbittorrent);
        assert_eq!(qb.base_url(), "http://localhost:8080");
        assert_eq!(qb.display_name(), "qb");

        let site = config.site("site-a").unwrap();
        assert!(site.feed_url().is_some());
        assert_eq!(site.order, 2);
    }

    #[test]
    fn test_base_url_keeps_scheme() {
        let profile = DownloaderProfile {
            id: "tr".to_string(),
            name: String::new(),
            backend_kind: BackendKind::Transmission,
            host: "https://tr.example/".to_string(),
            port: 443,
            username: String::new(),
            password: String::new(),
            default_save_dir: None,
            timeout_secs: 30,
        };
        assert_eq!(profile.base_url(), "https://tr.example:443");
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = r#"
[[downloaders]]
id = "qb"
backend_kind = "qbittorrent"
host = "localhost"
port = 8080
password = "secret"

[[sites]]
id = "site-a"
rss_url = "https://tracker.example/rss?passkey=abc"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("passkey"));
        assert!(sanitized.downloaders[0].password_configured);
        assert!(sanitized.sites[0].rss_configured);
        assert!(!sanitized.sites[0].cookie_configured);
    }
}
