//! Seedwarden core: rule-driven torrent acquisition and seeding lifecycle.
//!
//! Two engines share the collaborators in this crate. Brush tasks farm a
//! site's feed under volume and concurrency ceilings and retire torrents by
//! removal rules. Subscriptions watch feeds for specific movies and TV
//! seasons and track which episodes are still missing.

pub mod brush;
pub mod collaborators;
pub mod config;
pub mod downloader;
pub mod feed;
pub mod filter;
pub mod metrics;
pub mod repository;
pub mod subscription;
pub mod testing;
pub mod threshold;

pub use brush::{BrushAcquisitionLoop, BrushLifecycleLoop, BrushTask};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use downloader::{DownloaderGateway, GatewayRegistry};
pub use repository::{Repository, SqliteRepository};
pub use subscription::{SubscriptionFeedLoop, SubscriptionMatcher};
