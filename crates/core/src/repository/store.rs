use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::brush::RemovalReason;
use crate::subscription::{Subscription, SubscriptionState};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Database(e.to_string())
    }
}

/// A torrent to start tracking for a brush task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackedTorrent {
    pub task_id: String,
    pub enclosure_url: String,
    pub title: String,
    pub downloader: String,
    pub torrent_id: String,
    pub size_bytes: u64,
}

/// A torrent tracked for a brush task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTorrent {
    pub task_id: String,
    pub enclosure_url: String,
    pub title: String,
    pub downloader: String,
    pub torrent_id: String,
    pub size_bytes: u64,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub removal_reason: Option<RemovalReason>,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
}

/// A tracked torrent the lifecycle loop just deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedTorrent {
    pub torrent_id: String,
    pub reason: RemovalReason,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
}

/// Lifetime counters of a brush task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub acquired: u64,
    pub removed: u64,
    pub total_uploaded: u64,
    pub total_downloaded: u64,
}

/// Storage used by the engine loops.
///
/// Calls are synchronous and short; implementations serialize access
/// internally so one instance can be shared across tasks.
pub trait Repository: Send + Sync {
    // subscriptions

    fn list_subscriptions(
        &self,
        state: SubscriptionState,
    ) -> Result<Vec<Subscription>, RepositoryError>;

    fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, RepositoryError>;

    /// Insert a subscription, or update its definition. Persisted state and
    /// episode bookkeeping of an existing row are kept.
    fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), RepositoryError>;

    fn update_lack_episodes(
        &self,
        id: &str,
        lack_episodes: &BTreeSet<u32>,
    ) -> Result<(), RepositoryError>;

    fn finish_subscription(&self, id: &str) -> Result<(), RepositoryError>;

    // enclosure history

    fn is_enclosure_seen(&self, enclosure_url: &str) -> Result<bool, RepositoryError>;

    fn mark_enclosure_seen(&self, enclosure_url: &str, title: &str) -> Result<(), RepositoryError>;

    // tracked brush torrents

    /// Start tracking a torrent. Returns false when the task already tracks
    /// this enclosure.
    fn insert_tracked_torrent(&self, torrent: &NewTrackedTorrent) -> Result<bool, RepositoryError>;

    /// Whether the task has ever tracked this enclosure.
    fn is_tracked(&self, task_id: &str, enclosure_url: &str) -> Result<bool, RepositoryError>;

    /// Ids of the task's torrents that have not been removed.
    fn tracked_torrent_ids(&self, task_id: &str) -> Result<Vec<String>, RepositoryError>;

    fn tracked_torrents(&self, task_id: &str) -> Result<Vec<TrackedTorrent>, RepositoryError>;

    /// Forget torrents that disappeared from the downloader.
    fn drop_tracked_torrents(&self, task_id: &str, ids: &[String]) -> Result<(), RepositoryError>;

    fn mark_removed(&self, task_id: &str, removed: &[RemovedTorrent]) -> Result<(), RepositoryError>;

    /// Total size in bytes of the task's non-removed torrents.
    fn retained_volume(&self, task_id: &str) -> Result<u64, RepositoryError>;

    // counters

    fn increment_acquired(&self, task_id: &str) -> Result<(), RepositoryError>;

    fn add_task_counters(
        &self,
        task_id: &str,
        uploaded: u64,
        downloaded: u64,
        removed: u64,
    ) -> Result<(), RepositoryError>;

    fn task_counters(&self, task_id: &str) -> Result<TaskCounters, RepositoryError>;
}
