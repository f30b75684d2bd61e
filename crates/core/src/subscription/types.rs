//! Subscription types.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::MediaInfo;
use crate::feed::FeedItem;
use crate::filter::MediaKind;
use crate::repository::RepositoryError;

/// Errors that abort a subscription feed cycle.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Created, not yet searched.
    Draft,
    /// A one-off search is running.
    Searching,
    /// Waiting for feed items.
    Rss,
    /// Satisfied; kept for history.
    Finished,
}

impl SubscriptionState {
    /// Single-letter code used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Draft => "D",
            SubscriptionState::Searching => "S",
            SubscriptionState::Rss => "R",
            SubscriptionState::Finished => "F",
        }
    }
}

impl FromStr for SubscriptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D" => Ok(SubscriptionState::Draft),
            "S" => Ok(SubscriptionState::Searching),
            "R" => Ok(SubscriptionState::Rss),
            "F" => Ok(SubscriptionState::Finished),
            other => Err(format!("unknown subscription state '{}'", other)),
        }
    }
}

fn default_state() -> SubscriptionState {
    SubscriptionState::Rss
}

/// A movie or TV subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub kind: MediaKind,
    /// Canonical title.
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    /// Season string such as `"S01"`. `"S00"` means any season.
    #[serde(default)]
    pub season: Option<String>,
    /// External identity reference. A `DB:` prefix marks an unverified one.
    #[serde(default)]
    pub identity: Option<String>,
    /// Match raw titles by keyword instead of canonical identity.
    #[serde(default)]
    pub fuzzy: bool,
    /// Sites whose feeds may satisfy this subscription; empty means all.
    #[serde(default)]
    pub rss_sites: Vec<String>,
    #[serde(default)]
    pub search_sites: Vec<String>,
    /// Keep acquiring better editions even when the library has the item.
    #[serde(default)]
    pub over_edition: bool,
    /// Filter group override.
    #[serde(default)]
    pub filter_rule: Option<String>,
    #[serde(default)]
    pub filter_restype: Option<String>,
    #[serde(default)]
    pub filter_pix: Option<String>,
    #[serde(default)]
    pub filter_team: Option<String>,
    #[serde(default)]
    pub save_path: Option<String>,
    /// Downloader profile id; the first configured downloader when unset.
    #[serde(default)]
    pub downloader: Option<String>,
    #[serde(default)]
    pub total_episodes: Option<u32>,
    #[serde(default)]
    pub current_episode: Option<u32>,
    /// Episodes still needed; `None` until first computed.
    #[serde(default)]
    pub lack_episodes: Option<BTreeSet<u32>>,
    #[serde(default = "default_state")]
    pub state: SubscriptionState,
}

impl Subscription {
    /// Whether `identity` is authoritative for exact matching.
    pub fn authoritative_identity(&self) -> Option<&str> {
        self.identity
            .as_deref()
            .filter(|id| !id.is_empty() && !id.starts_with("DB:"))
    }

    /// Season number parsed from `"S01"`-style strings.
    pub fn season_number(&self) -> Option<u32> {
        let season = self.season.as_deref()?.trim();
        season
            .strip_prefix('S')
            .or_else(|| season.strip_prefix('s'))
            .unwrap_or(season)
            .parse()
            .ok()
    }

    /// Whether the season is the "any season" sentinel.
    pub fn any_season(&self) -> bool {
        self.season_number() == Some(0)
    }

    /// Whether the subscription follows `site`.
    pub fn follows_site(&self, site: &str) -> bool {
        self.rss_sites.is_empty() || self.rss_sites.iter().any(|s| s == site)
    }

    pub fn episode_state(&self) -> EpisodeState {
        EpisodeState {
            lack_episodes: self.lack_episodes.clone(),
            current_episode: self.current_episode,
        }
    }
}

/// Persisted episode bookkeeping of a TV subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeState {
    pub lack_episodes: Option<BTreeSet<u32>>,
    pub current_episode: Option<u32>,
}

/// A feed item resolved to media, as seen by the matcher.
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    pub item: FeedItem,
    pub media: MediaInfo,
    /// Site the item came from.
    pub site: String,
    /// Site preference; higher wins ties.
    pub site_order: i32,
    /// Whether the site's detail pages may be probed.
    pub probe_details: bool,
    pub cookie: Option<String>,
}

/// Binding of an accepted candidate to the subscription it satisfies.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionBinding {
    pub subscription_id: String,
    pub kind: MediaKind,
    pub season_number: Option<u32>,
    pub priority: i32,
    pub upload_factor: Option<f64>,
    pub download_factor: Option<f64>,
    pub hit_and_run: bool,
    pub save_path: Option<String>,
}

/// Result of matching one candidate against the subscription set.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matched: bool,
    pub messages: Vec<String>,
    pub binding: Option<SubscriptionBinding>,
}

impl MatchResult {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self {
            matched: false,
            messages: vec![message.into()],
            binding: None,
        }
    }
}
