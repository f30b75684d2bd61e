//! Removal decisions for farmed torrents.

use chrono::{DateTime, Utc};

use crate::downloader::{StatusFilter, TorrentView};
use crate::filter::GIB;

use super::{RemovalReason, RemovalRule};

const HOUR_SECS: f64 = 3600.0;
const KIB: f64 = 1024.0;

/// Status cohort a torrent was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    Completed,
    Downloading,
}

impl Cohort {
    pub fn status_filter(&self) -> StatusFilter {
        match self {
            Cohort::Completed => StatusFilter::Completed,
            Cohort::Downloading => StatusFilter::Downloading,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::Completed => "completed",
            Cohort::Downloading => "downloading",
        }
    }
}

/// Figures a removal decision is based on.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetrics {
    /// Seconds since completion, or since added when completion is unknown.
    pub seeding_secs: f64,
    /// Seconds since added.
    pub elapsed_secs: f64,
    pub uploaded: u64,
    pub downloaded: u64,
    pub ratio: f64,
    /// Lifetime average upload speed in bytes per second. `None` until any
    /// time has elapsed.
    pub avg_upspeed: Option<f64>,
}

impl TorrentMetrics {
    pub fn derive(view: &TorrentView, now: DateTime<Utc>) -> Self {
        let since = |at: Option<DateTime<Utc>>| {
            at.map(|t| (now - t).num_seconds().max(0) as f64)
                .unwrap_or(0.0)
        };

        let elapsed_secs = since(view.added_at);
        let seeding_secs = since(view.completed_at.or(view.added_at));
        let avg_upspeed = if elapsed_secs > 0.0 {
            Some(view.uploaded_bytes as f64 / elapsed_secs)
        } else {
            None
        };

        Self {
            seeding_secs,
            elapsed_secs,
            uploaded: view.uploaded_bytes,
            downloaded: view.downloaded_bytes,
            ratio: view.ratio,
            avg_upspeed,
        }
    }
}

/// A task's removal rule, evaluated per torrent.
///
/// Axes are checked in a fixed order and the first one that triggers names
/// the reason: seeding time, ratio, uploaded size, download time, average
/// upload speed. Seeding time, ratio and uploaded size only apply to
/// completed torrents; download time only to torrents still downloading.
#[derive(Debug, Clone, Default)]
pub struct RemovalPolicy {
    rule: RemovalRule,
}

impl RemovalPolicy {
    pub fn new(rule: RemovalRule) -> Self {
        Self { rule }
    }

    pub fn is_empty(&self) -> bool {
        self.rule.is_empty()
    }

    pub fn evaluate(&self, metrics: &TorrentMetrics, cohort: Cohort) -> Option<RemovalReason> {
        let rule = &self.rule;

        if cohort == Cohort::Completed {
            if let Some(limit) = &rule.seeding_time_limit {
                if limit.exceeds(metrics.seeding_secs, HOUR_SECS) {
                    return Some(RemovalReason::SeedTime);
                }
            }
            if let Some(limit) = &rule.ratio_limit {
                if limit.exceeds(metrics.ratio, 1.0) {
                    return Some(RemovalReason::Ratio);
                }
            }
            if let Some(limit) = &rule.upload_size_limit {
                if limit.exceeds(metrics.uploaded as f64, GIB) {
                    return Some(RemovalReason::UploadSize);
                }
            }
        }

        if cohort == Cohort::Downloading {
            if let Some(limit) = &rule.download_time_limit {
                if limit.exceeds(metrics.elapsed_secs, HOUR_SECS) {
                    return Some(RemovalReason::DownloadTime);
                }
            }
        }

        if let (Some(floor), Some(speed)) = (&rule.avg_upspeed_floor, metrics.avg_upspeed) {
            if floor.below(speed, KIB) {
                return Some(RemovalReason::AvgUpspeed);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::ThresholdRule;
    use chrono::Duration;

    const DAY: i64 = 24 * 3600;

    fn view(added_secs_ago: i64, completed_secs_ago: Option<i64>, now: DateTime<Utc>) -> TorrentView {
        TorrentView {
            id: "hash".to_string(),
            name: "Some.Torrent".to_string(),
            added_at: Some(now - Duration::seconds(added_secs_ago)),
            completed_at: completed_secs_ago.map(|s| now - Duration::seconds(s)),
            uploaded_bytes: 0,
            downloaded_bytes: 0,
            ratio: 0.0,
            total_size: 0,
            progress_pct: 100.0,
        }
    }

    fn metrics_with(seeding_secs: f64) -> TorrentMetrics {
        TorrentMetrics {
            seeding_secs,
            elapsed_secs: seeding_secs,
            uploaded: 0,
            downloaded: 0,
            ratio: 0.0,
            avg_upspeed: None,
        }
    }

    #[test]
    fn test_seeding_time_limit_in_hours() {
        let policy = RemovalPolicy::new(RemovalRule {
            seeding_time_limit: ThresholdRule::parse("#720").unwrap(),
            ..Default::default()
        });

        let over = metrics_with((31 * DAY) as f64);
        assert_eq!(
            policy.evaluate(&over, Cohort::Completed),
            Some(RemovalReason::SeedTime)
        );

        let under = metrics_with((29 * DAY) as f64);
        assert_eq!(policy.evaluate(&under, Cohort::Completed), None);
    }

    #[test]
    fn test_seeding_axes_ignored_while_downloading() {
        let policy = RemovalPolicy::new(RemovalRule {
            seeding_time_limit: Some(ThresholdRule::value(1.0)),
            ratio_limit: Some(ThresholdRule::value(1.0)),
            ..Default::default()
        });
        let mut metrics = metrics_with((10 * DAY) as f64);
        metrics.ratio = 5.0;
        assert_eq!(policy.evaluate(&metrics, Cohort::Downloading), None);
    }

    #[test]
    fn test_first_axis_wins() {
        let policy = RemovalPolicy::new(RemovalRule {
            seeding_time_limit: Some(ThresholdRule::value(1.0)),
            ratio_limit: Some(ThresholdRule::gt(2.0)),
            upload_size_limit: Some(ThresholdRule::value(1.0)),
            ..Default::default()
        });
        let mut metrics = metrics_with(2.0 * 3600.0);
        metrics.ratio = 3.0;
        metrics.uploaded = 2 * 1024 * 1024 * 1024;
        assert_eq!(
            policy.evaluate(&metrics, Cohort::Completed),
            Some(RemovalReason::SeedTime)
        );

        metrics.seeding_secs = 60.0;
        assert_eq!(
            policy.evaluate(&metrics, Cohort::Completed),
            Some(RemovalReason::Ratio)
        );

        metrics.ratio = 1.0;
        assert_eq!(
            policy.evaluate(&metrics, Cohort::Completed),
            Some(RemovalReason::UploadSize)
        );
    }

    #[test]
    fn test_ratio_limit_is_strict() {
        let policy = RemovalPolicy::new(RemovalRule {
            ratio_limit: Some(ThresholdRule::value(2.0)),
            ..Default::default()
        });
        let mut metrics = metrics_with(0.0);
        metrics.ratio = 2.0;
        assert_eq!(policy.evaluate(&metrics, Cohort::Completed), None);
        metrics.ratio = 2.01;
        assert_eq!(
            policy.evaluate(&metrics, Cohort::Completed),
            Some(RemovalReason::Ratio)
        );
    }

    #[test]
    fn test_download_time_limit() {
        let policy = RemovalPolicy::new(RemovalRule {
            download_time_limit: Some(ThresholdRule::value(24.0)),
            ..Default::default()
        });
        let stuck = metrics_with((2 * DAY) as f64);
        assert_eq!(
            policy.evaluate(&stuck, Cohort::Downloading),
            Some(RemovalReason::DownloadTime)
        );
        assert_eq!(policy.evaluate(&stuck, Cohort::Completed), None);
    }

    #[test]
    fn test_avg_upspeed_floor_both_cohorts() {
        let policy = RemovalPolicy::new(RemovalRule {
            avg_upspeed_floor: Some(ThresholdRule::lt(50.0)),
            ..Default::default()
        });
        let mut slow = metrics_with(3600.0);
        slow.avg_upspeed = Some(10.0 * 1024.0);
        assert_eq!(
            policy.evaluate(&slow, Cohort::Completed),
            Some(RemovalReason::AvgUpspeed)
        );
        assert_eq!(
            policy.evaluate(&slow, Cohort::Downloading),
            Some(RemovalReason::AvgUpspeed)
        );

        let mut fast = slow.clone();
        fast.avg_upspeed = Some(100.0 * 1024.0);
        assert_eq!(policy.evaluate(&fast, Cohort::Completed), None);

        let mut fresh = slow;
        fresh.avg_upspeed = None;
        assert_eq!(policy.evaluate(&fresh, Cohort::Completed), None);
    }

    #[test]
    fn test_empty_policy_never_removes() {
        let policy = RemovalPolicy::default();
        assert!(policy.is_empty());
        let mut metrics = metrics_with((365 * DAY) as f64);
        metrics.ratio = 100.0;
        metrics.avg_upspeed = Some(0.0);
        assert_eq!(policy.evaluate(&metrics, Cohort::Completed), None);
    }

    #[test]
    fn test_derive_metrics() {
        let now = Utc::now();
        let mut completed = view(10 * DAY, Some(4 * DAY), now);
        completed.uploaded_bytes = 10 * DAY as u64 * 1024;
        completed.ratio = 1.5;

        let metrics = TorrentMetrics::derive(&completed, now);
        assert_eq!(metrics.seeding_secs, (4 * DAY) as f64);
        assert_eq!(metrics.elapsed_secs, (10 * DAY) as f64);
        assert_eq!(metrics.avg_upspeed, Some(1024.0));
        assert_eq!(metrics.ratio, 1.5);
    }

    #[test]
    fn test_derive_falls_back_to_added_time() {
        let now = Utc::now();
        let metrics = TorrentMetrics::derive(&view(DAY, None, now), now);
        assert_eq!(metrics.seeding_secs, DAY as f64);
    }

    #[test]
    fn test_derive_zero_elapsed_has_no_speed() {
        let now = Utc::now();
        let metrics = TorrentMetrics::derive(&view(0, None, now), now);
        assert_eq!(metrics.elapsed_secs, 0.0);
        assert_eq!(metrics.avg_upspeed, None);

        let mut unknown = view(0, None, now);
        unknown.added_at = None;
        assert_eq!(TorrentMetrics::derive(&unknown, now).avg_upspeed, None);
    }
}
