//! Brush task configuration and removal bookkeeping types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::ProbeError;
use crate::downloader::GatewayError;
use crate::filter::PromoClass;
use crate::repository::RepositoryError;
use crate::threshold::{self, ThresholdRule};

/// Errors that abort a brush cycle.
#[derive(Debug, Error)]
pub enum BrushError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Downloader error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Site probe error: {0}")]
    Probe(#[from] ProbeError),
}

/// A farming task: acquire from one site's feed, retire by removal rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrushTask {
    pub id: String,
    pub name: String,
    /// Site id whose feed is polled.
    pub site: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub acquisition_rule: AcquisitionRule,
    #[serde(default)]
    pub removal_rule: RemovalRule,
    /// Downloader profile id.
    pub downloader: String,
    /// When false, added torrents are tagged as already organized so the
    /// transfer step ignores them.
    #[serde(default)]
    pub transfer_after_complete: bool,
    /// Ceiling on the total size of retained torrents, in GiB.
    #[serde(default)]
    pub retained_volume_ceiling: Option<f64>,
    #[serde(default)]
    pub send_notifications: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    10
}

impl BrushTask {
    /// Promotional mode: only promoted torrents are acquired, which needs
    /// the site cookie to probe detail pages.
    pub fn promo_only(&self) -> bool {
        self.acquisition_rule.promo_class != PromoClass::Any
    }
}

/// Which feed items a task acquires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionRule {
    /// Pattern searched in `"{title} {description}"`.
    #[serde(default)]
    pub include: Option<String>,
    #[serde(default)]
    pub exclude: Option<String>,
    /// Total size range in GiB.
    #[serde(default, with = "threshold::optional")]
    pub size_range: Option<ThresholdRule>,
    #[serde(default)]
    pub promo_class: PromoClass,
    /// Seeder count range. A bare number means `lt#<n>`.
    #[serde(default, with = "threshold::optional_count")]
    pub peer_count_range: Option<ThresholdRule>,
    /// Items published more than this many hours ago are skipped.
    #[serde(default, with = "threshold::optional")]
    pub publish_age_limit_hours: Option<ThresholdRule>,
    #[serde(default)]
    pub concurrent_download_ceiling: Option<usize>,
    #[serde(default)]
    pub exclude_hit_and_run: bool,
    #[serde(default)]
    pub upload_limit_kib: Option<u64>,
    #[serde(default)]
    pub download_limit_kib: Option<u64>,
}

impl AcquisitionRule {
    /// Whether evaluating this rule needs the detail-page probe.
    pub fn needs_probe(&self) -> bool {
        self.promo_class != PromoClass::Any
            || self.exclude_hit_and_run
            || self.peer_count_range.is_some()
    }
}

/// When a task's torrents are retired.
///
/// Every axis is optional and its direction is fixed: the time, ratio and
/// upload axes are ceilings, the speed axis is a floor. The operator part
/// of the encoding is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovalRule {
    /// Hours seeded since completion.
    #[serde(default, with = "threshold::optional")]
    pub seeding_time_limit: Option<ThresholdRule>,
    #[serde(default, with = "threshold::optional")]
    pub ratio_limit: Option<ThresholdRule>,
    /// Uploaded GiB.
    #[serde(default, with = "threshold::optional")]
    pub upload_size_limit: Option<ThresholdRule>,
    /// Hours since added, for torrents still downloading.
    #[serde(default, with = "threshold::optional")]
    pub download_time_limit: Option<ThresholdRule>,
    /// Lifetime average upload speed floor, in KiB/s.
    #[serde(default, with = "threshold::optional")]
    pub avg_upspeed_floor: Option<ThresholdRule>,
}

impl RemovalRule {
    pub fn is_empty(&self) -> bool {
        self.seeding_time_limit.is_none()
            && self.ratio_limit.is_none()
            && self.upload_size_limit.is_none()
            && self.download_time_limit.is_none()
            && self.avg_upspeed_floor.is_none()
    }
}

/// Why a torrent was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalReason {
    #[serde(rename = "SEEDTIME")]
    SeedTime,
    #[serde(rename = "RATIO")]
    Ratio,
    #[serde(rename = "UPLOADSIZE")]
    UploadSize,
    #[serde(rename = "DLTIME")]
    DownloadTime,
    #[serde(rename = "AVGUPSPEED")]
    AvgUpspeed,
}

impl RemovalReason {
    pub fn tag(&self) -> &'static str {
        match self {
            RemovalReason::SeedTime => "SEEDTIME",
            RemovalReason::Ratio => "RATIO",
            RemovalReason::UploadSize => "UPLOADSIZE",
            RemovalReason::DownloadTime => "DLTIME",
            RemovalReason::AvgUpspeed => "AVGUPSPEED",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SEEDTIME" => Some(RemovalReason::SeedTime),
            "RATIO" => Some(RemovalReason::Ratio),
            "UPLOADSIZE" => Some(RemovalReason::UploadSize),
            "DLTIME" => Some(RemovalReason::DownloadTime),
            "AVGUPSPEED" => Some(RemovalReason::AvgUpspeed),
            _ => None,
        }
    }

    /// Human-readable description used in notifications.
    pub fn describe(&self) -> &'static str {
        match self {
            RemovalReason::SeedTime => "seeding time limit reached",
            RemovalReason::Ratio => "ratio limit reached",
            RemovalReason::UploadSize => "upload size limit reached",
            RemovalReason::DownloadTime => "download time limit reached",
            RemovalReason::AvgUpspeed => "average upload speed below floor",
        }
    }
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Why a cycle did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TaskNotFound,
    TaskDisabled,
    SiteNotFound(String),
    FeedNotConfigured(String),
    CookieRequired(String),
    DownloaderUnavailable(String),
    DownloaderUnreachable(String),
    NothingTracked,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TaskNotFound => write!(f, "task not found"),
            SkipReason::TaskDisabled => write!(f, "task disabled"),
            SkipReason::SiteNotFound(site) => write!(f, "site '{}' not found", site),
            SkipReason::FeedNotConfigured(site) => {
                write!(f, "site '{}' has no feed url configured", site)
            }
            SkipReason::CookieRequired(site) => {
                write!(f, "promotional mode needs a cookie for site '{}'", site)
            }
            SkipReason::DownloaderUnavailable(id) => {
                write!(f, "downloader '{}' is not available", id)
            }
            SkipReason::DownloaderUnreachable(id) => {
                write!(f, "downloader '{}' did not respond", id)
            }
            SkipReason::NothingTracked => write!(f, "no tracked torrents"),
        }
    }
}

impl SkipReason {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::TaskNotFound => "task_not_found",
            SkipReason::TaskDisabled => "task_disabled",
            SkipReason::SiteNotFound(_) => "site_not_found",
            SkipReason::FeedNotConfigured(_) => "feed_not_configured",
            SkipReason::CookieRequired(_) => "cookie_required",
            SkipReason::DownloaderUnavailable(_) => "downloader_unavailable",
            SkipReason::DownloaderUnreachable(_) => "downloader_unreachable",
            SkipReason::NothingTracked => "nothing_tracked",
        }
    }
}

/// Outcome of one `run_once` call.
#[derive(Debug, Clone)]
pub enum CycleOutcome<T> {
    Completed(T),
    Skipped(SkipReason),
}

impl<T> CycleOutcome<T> {
    pub fn report(&self) -> Option<&T> {
        match self {
            CycleOutcome::Completed(report) => Some(report),
            CycleOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            CycleOutcome::Completed(_) => None,
            CycleOutcome::Skipped(reason) => Some(reason),
        }
    }
}

/// What an acquisition cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    /// Ids of torrents added this cycle.
    pub added: Vec<String>,
    /// Items already seen by this task.
    pub skipped_seen: usize,
    /// Items failing the acquisition rule, or added without a reported id.
    pub rejected: usize,
    /// Whether a volume or concurrency gate ended the cycle.
    pub stopped_by_gate: bool,
}

/// What a lifecycle cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleReport {
    pub removed: Vec<(String, RemovalReason)>,
    /// Tracked ids dropped because the downloader no longer knows them.
    pub reconciled: Vec<String>,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Cohorts whose status query failed this cycle.
    pub cohort_errors: usize,
}
