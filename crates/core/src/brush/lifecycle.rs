//! Removal of farmed torrents that have served their purpose.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collaborators::Notifier;
use crate::config::Config;
use crate::downloader::{DownloaderGateway, GatewayRegistry, TorrentQuery};
use crate::metrics;
use crate::repository::{RemovedTorrent, Repository};

use super::{
    BrushError, BrushTask, Cohort, CycleOutcome, LifecycleReport, RemovalPolicy, SkipReason,
    TorrentMetrics,
};

/// Applies a task's removal rule to the torrents it tracks.
///
/// Each cohort is judged only on a successful status query. Tracked ids the
/// downloader no longer reports are dropped from tracking without a delete
/// call, and only when both cohort queries succeeded.
pub struct BrushLifecycleLoop {
    config: Arc<Config>,
    repository: Arc<dyn Repository>,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
}

impl BrushLifecycleLoop {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn Repository>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            repository,
            gateways,
            notifier,
        }
    }

    /// Run one lifecycle cycle for every enabled task. A failing task does
    /// not stop the others.
    pub async fn run_all(&self) -> Vec<(String, Result<CycleOutcome<LifecycleReport>, BrushError>)> {
        let mut results = Vec::new();
        for task in self.config.brush_tasks.iter().filter(|t| t.enabled) {
            let result = self.run_once(&task.id).await;
            if let Err(e) = &result {
                warn!(task = %task.name, "Lifecycle cycle failed: {}", e);
            }
            results.push((task.id.clone(), result));
        }
        results
    }

    pub async fn run_once(
        &self,
        task_id: &str,
    ) -> Result<CycleOutcome<LifecycleReport>, BrushError> {
        let started = Instant::now();

        let (task, gateway) = match self.preconditions(task_id) {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(self.skip(task_id, reason)),
        };

        let ids = self.repository.tracked_torrent_ids(&task.id)?;
        if ids.is_empty() {
            return Ok(self.skip(task_id, SkipReason::NothingTracked));
        }

        let (completed, downloading) = futures::join!(
            gateway.get_torrents(&ids, Cohort::Completed.status_filter()),
            gateway.get_torrents(&ids, Cohort::Downloading.status_filter()),
        );

        let policy = RemovalPolicy::new(task.removal_rule.clone());
        let now = Utc::now();
        let mut report = LifecycleReport::default();
        let mut removals = Vec::new();
        let mut names = Vec::new();

        for (cohort, query) in [(Cohort::Completed, &completed), (Cohort::Downloading, &downloading)] {
            if query.has_error {
                report.cohort_errors += 1;
                warn!(
                    task = %task.name,
                    "Status query for {} torrents failed, leaving them alone",
                    cohort.as_str()
                );
                continue;
            }
            for view in &query.torrents {
                let torrent_metrics = TorrentMetrics::derive(view, now);
                let Some(reason) = policy.evaluate(&torrent_metrics, cohort) else {
                    continue;
                };
                debug!(task = %task.name, torrent = %view.name, "Removing: {}", reason.describe());
                report.uploaded += view.uploaded_bytes;
                report.downloaded += view.downloaded_bytes;
                report.removed.push((view.id.clone(), reason));
                names.push(view.name.clone());
                removals.push(RemovedTorrent {
                    torrent_id: view.id.clone(),
                    reason,
                    uploaded_bytes: view.uploaded_bytes,
                    downloaded_bytes: view.downloaded_bytes,
                });
            }
        }

        if !removals.is_empty() {
            let doomed: Vec<String> = removals.iter().map(|r| r.torrent_id.clone()).collect();
            if let Err(e) = gateway.delete_torrents(&doomed, true).await {
                metrics::GATEWAY_ERRORS.with_label_values(&["delete"]).inc();
                warn!(task = %task.name, "Failed to delete {} torrents: {}", doomed.len(), e);
                return Err(BrushError::Gateway(e));
            }
        }

        if report.cohort_errors == 0 {
            report.reconciled = externally_removed(&ids, &completed, &downloading);
            if !report.reconciled.is_empty() {
                self.repository
                    .drop_tracked_torrents(&task.id, &report.reconciled)?;
                metrics::TORRENTS_RECONCILED.inc_by(report.reconciled.len() as u64);
                info!(
                    task = %task.name,
                    "{} torrents were removed outside seedwarden",
                    report.reconciled.len()
                );
            }
        }

        if !removals.is_empty() {
            self.repository.mark_removed(&task.id, &removals)?;
            for removal in &removals {
                metrics::TORRENTS_REMOVED
                    .with_label_values(&[removal.reason.tag()])
                    .inc();
            }
        }

        let removed_count = (removals.len() + report.reconciled.len()) as u64;
        if removed_count > 0 {
            self.repository.add_task_counters(
                &task.id,
                report.uploaded,
                report.downloaded,
                removed_count,
            )?;
        }

        if task.send_notifications {
            for (name, (_, reason)) in names.iter().zip(&report.removed) {
                let body = format!("{}: {} ({})", task.name, name, reason.describe());
                if let Err(e) = self.notifier.notify("Brush torrent removed", &body).await {
                    warn!("Notification failed: {}", e);
                }
            }
        }

        metrics::CYCLE_DURATION
            .with_label_values(&["lifecycle"])
            .observe(started.elapsed().as_secs_f64());
        info!(
            task = %task.name,
            "Lifecycle done: {} removed, {} reconciled, {} cohort errors",
            report.removed.len(),
            report.reconciled.len(),
            report.cohort_errors
        );
        Ok(CycleOutcome::Completed(report))
    }

    fn preconditions(
        &self,
        task_id: &str,
    ) -> Result<(&BrushTask, Arc<dyn DownloaderGateway>), SkipReason> {
        let task = self
            .config
            .brush_task(task_id)
            .ok_or(SkipReason::TaskNotFound)?;
        if !task.enabled {
            return Err(SkipReason::TaskDisabled);
        }
        let gateway = self
            .gateways
            .get(&task.downloader)
            .ok_or_else(|| SkipReason::DownloaderUnavailable(task.downloader.clone()))?;
        Ok((task, gateway))
    }

    fn skip(&self, task_id: &str, reason: SkipReason) -> CycleOutcome<LifecycleReport> {
        metrics::CYCLE_SKIPS
            .with_label_values(&["lifecycle", reason.kind()])
            .inc();
        if reason == SkipReason::NothingTracked {
            debug!(task = %task_id, "Skipping lifecycle: {}", reason);
        } else {
            info!(task = %task_id, "Skipping lifecycle: {}", reason);
        }
        CycleOutcome::Skipped(reason)
    }
}

/// Tracked ids reported by neither cohort.
fn externally_removed(
    tracked: &[String],
    completed: &TorrentQuery,
    downloading: &TorrentQuery,
) -> Vec<String> {
    let live: HashSet<&str> = completed
        .torrents
        .iter()
        .chain(&downloading.torrents)
        .map(|t| t.id.as_str())
        .collect();
    tracked
        .iter()
        .filter(|id| !live.contains(id.as_str()))
        .cloned()
        .collect()
}
