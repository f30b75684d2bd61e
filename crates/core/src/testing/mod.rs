//! Testing utilities and mock implementations of the collaborator traits.
//!
//! The mocks share their state behind an `Arc`, so a test can hand a clone
//! to the engine and keep one for configuration and assertions.
//!
//! # Example
//!
//! ```rust,ignore
//! use seedwarden_core::testing::{fixtures, MockFeedClient, MockGateway};
//!
//! let feeds = MockFeedClient::new();
//! feeds.set_items("https://site-a/rss", vec![fixtures::feed_item("Some.Movie", 1, 4.0)]);
//!
//! let gateway = MockGateway::new();
//! let mut gateways = GatewayRegistry::new();
//! gateways.register("qb", Arc::new(gateway.clone()));
//! ```

mod mock_feed;
mod mock_gateway;
mod mock_notifier;
mod mock_probe;
mod mock_resolver;

pub use mock_feed::MockFeedClient;
pub use mock_gateway::{MockGateway, RecordedAdd};
pub use mock_notifier::RecordingNotifier;
pub use mock_probe::MockSiteProbe;
pub use mock_resolver::MockMediaResolver;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{Duration, Utc};

    use crate::brush::BrushTask;
    use crate::config::{BackendKind, DownloaderProfile, SiteConfig};
    use crate::downloader::TorrentView;
    use crate::feed::FeedItem;
    use crate::filter::{MediaKind, GIB};
    use crate::subscription::{Subscription, SubscriptionState};

    /// A feed item with enclosure `https://tracker.example/download.php?id=<n>`
    /// and a matching details page, published now.
    pub fn feed_item(title: &str, n: u32, size_gib: f64) -> FeedItem {
        let mut item = FeedItem::new(
            title,
            format!("https://tracker.example/download.php?id={}", n),
        );
        item.detail_url = Some(format!("https://tracker.example/details.php?id={}", n));
        item.size_bytes = (size_gib * GIB) as u64;
        item.published_at = Some(Utc::now());
        item
    }

    /// A torrent that completed `seeding_hours` ago, added an hour earlier.
    pub fn seeding_torrent(id: &str, seeding_hours: i64) -> TorrentView {
        let now = Utc::now();
        TorrentView {
            id: id.to_string(),
            name: format!("Torrent {}", id),
            added_at: Some(now - Duration::hours(seeding_hours + 1)),
            completed_at: Some(now - Duration::hours(seeding_hours)),
            uploaded_bytes: 0,
            downloaded_bytes: GIB as u64,
            ratio: 0.0,
            total_size: GIB as u64,
            progress_pct: 100.0,
        }
    }

    /// A torrent added `hours` ago and still downloading.
    pub fn downloading_torrent(id: &str, hours: i64) -> TorrentView {
        TorrentView {
            id: id.to_string(),
            name: format!("Torrent {}", id),
            added_at: Some(Utc::now() - Duration::hours(hours)),
            completed_at: None,
            uploaded_bytes: 0,
            downloaded_bytes: 0,
            ratio: 0.0,
            total_size: GIB as u64,
            progress_pct: 42.0,
        }
    }

    pub fn site(id: &str) -> SiteConfig {
        SiteConfig {
            id: id.to_string(),
            name: id.to_string(),
            rss_url: Some(format!("https://{}.example/rss", id)),
            cookie: Some("uid=1; pass=secret".to_string()),
            user_agent: None,
            parse_details: false,
            filter_rule: None,
            order: 0,
        }
    }

    pub fn downloader(id: &str) -> DownloaderProfile {
        DownloaderProfile {
            id: id.to_string(),
            name: String::new(),
            backend_kind: BackendKind::Qbittorrent,
            host: "localhost".to_string(),
            port: 8080,
            username: "admin".to_string(),
            password: "adminadmin".to_string(),
            default_save_dir: None,
            timeout_secs: 30,
        }
    }

    /// An enabled task without acquisition or removal constraints.
    pub fn brush_task(id: &str, site: &str, downloader: &str) -> BrushTask {
        BrushTask {
            id: id.to_string(),
            name: format!("Task {}", id),
            site: site.to_string(),
            enabled: true,
            interval_minutes: 10,
            acquisition_rule: Default::default(),
            removal_rule: Default::default(),
            downloader: downloader.to_string(),
            transfer_after_complete: false,
            retained_volume_ceiling: None,
            send_notifications: false,
        }
    }

    pub fn subscription(id: &str, kind: MediaKind, title: &str, year: Option<i32>) -> Subscription {
        Subscription {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            year,
            season: None,
            identity: None,
            fuzzy: false,
            rss_sites: Vec::new(),
            search_sites: Vec::new(),
            over_edition: false,
            filter_rule: None,
            filter_restype: None,
            filter_pix: None,
            filter_team: None,
            save_path: None,
            downloader: None,
            total_episodes: None,
            current_episode: None,
            lack_episodes: None,
            state: SubscriptionState::Rss,
        }
    }
}
