//! Feed-driven acquisition for brush tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collaborators::{Notifier, SiteProbe, TorrentAttributes};
use crate::config::{Config, SiteConfig};
use crate::downloader::{AddTorrentRequest, DownloaderGateway, GatewayRegistry};
use crate::feed::{FeedClient, FeedItem, SeenCache};
use crate::filter::{AdhocFilter, CandidateAttrs, FilterRuleEngine, MediaKind, RuleRef, GIB};
use crate::metrics;
use crate::repository::{NewTrackedTorrent, Repository};

use super::{AcquisitionReport, AcquisitionRule, BrushError, BrushTask, CycleOutcome, SkipReason};

/// Extra tag for torrents the transfer step should leave alone.
pub const ORGANIZED_TAG: &str = "organized";

/// Gate that ended a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Volume,
    Concurrency,
}

impl Gate {
    fn as_str(&self) -> &'static str {
        match self {
            Gate::Volume => "volume",
            Gate::Concurrency => "concurrency",
        }
    }
}

/// Pulls a task's site feed and adds the items its acquisition rule accepts.
///
/// Cycles for different tasks may run concurrently. Cycles for the same
/// task must be serialized by the caller.
pub struct BrushAcquisitionLoop {
    config: Arc<Config>,
    repository: Arc<dyn Repository>,
    feeds: Arc<dyn FeedClient>,
    probe: Arc<dyn SiteProbe>,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
    filters: FilterRuleEngine,
    seen: Mutex<HashMap<String, SeenCache>>,
}

impl BrushAcquisitionLoop {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn Repository>,
        feeds: Arc<dyn FeedClient>,
        probe: Arc<dyn SiteProbe>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let filters = FilterRuleEngine::new(config.filter_groups.clone());
        Self {
            config,
            repository,
            feeds,
            probe,
            gateways,
            notifier,
            filters,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Run one acquisition cycle for `task_id`.
    ///
    /// A downloader or site that stops answering mid-cycle ends the cycle
    /// with an error. The item being handled is forgotten, so the next
    /// cycle sees it again.
    pub async fn run_once(
        &self,
        task_id: &str,
    ) -> Result<CycleOutcome<AcquisitionReport>, BrushError> {
        let started = Instant::now();

        let (task, site, feed_url, gateway) = match self.preconditions(task_id) {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(skip(task_id, reason)),
        };

        if gateway.get_downloading_count().await.is_none() {
            metrics::GATEWAY_ERRORS
                .with_label_values(&["downloading_count"])
                .inc();
            let reason = SkipReason::DownloaderUnreachable(task.downloader.clone());
            return Ok(skip(task_id, reason));
        }

        let mut report = AcquisitionReport::default();

        if let Some(gate) = self.closed_gate(task, gateway.as_ref()).await? {
            self.stop_at_gate(task, gate, &mut report);
            return Ok(CycleOutcome::Completed(report));
        }

        let items = match self.feeds.fetch(feed_url).await {
            Ok(items) => {
                metrics::FEED_FETCHES
                    .with_label_values(&[&site.id, "success"])
                    .inc();
                items
            }
            Err(e) => {
                metrics::FEED_FETCHES
                    .with_label_values(&[&site.id, "error"])
                    .inc();
                warn!(task = %task.name, "Failed to fetch feed of {}: {}", site.display_name(), e);
                return Ok(CycleOutcome::Completed(report));
            }
        };
        debug!(task = %task.name, "{} feed items from {}", items.len(), site.display_name());

        for item in items {
            metrics::FEED_ITEMS.with_label_values(&["brush"]).inc();

            if !self.first_sighting(task, &item).await? {
                report.skipped_seen += 1;
                continue;
            }

            match self.rejection(task, site, &item).await {
                Ok(None) => {}
                Ok(Some(rationale)) => {
                    debug!(task = %task.name, "Rejected {}: {}", item.title, rationale);
                    metrics::CANDIDATES_REJECTED.with_label_values(&["brush"]).inc();
                    report.rejected += 1;
                    continue;
                }
                Err(e) => {
                    self.forget(task, &item).await;
                    warn!(task = %task.name, "Detail page of {} unavailable: {}", item.title, e);
                    return Err(e);
                }
            }

            match self.acquire(task, site, gateway.as_ref(), &item).await? {
                Some(id) => report.added.push(id),
                None => {
                    report.rejected += 1;
                    continue;
                }
            }

            if let Some(gate) = self.closed_gate(task, gateway.as_ref()).await? {
                self.stop_at_gate(task, gate, &mut report);
                break;
            }
        }

        metrics::CYCLE_DURATION
            .with_label_values(&["acquisition"])
            .observe(started.elapsed().as_secs_f64());
        info!(
            task = %task.name,
            "Acquisition done: {} added, {} seen, {} rejected",
            report.added.len(),
            report.skipped_seen,
            report.rejected
        );
        Ok(CycleOutcome::Completed(report))
    }

    fn preconditions<'a>(
        &'a self,
        task_id: &str,
    ) -> Result<(&'a BrushTask, &'a SiteConfig, &'a str, Arc<dyn DownloaderGateway>), SkipReason>
    {
        let task = self
            .config
            .brush_task(task_id)
            .ok_or(SkipReason::TaskNotFound)?;
        if !task.enabled {
            return Err(SkipReason::TaskDisabled);
        }
        let site = self
            .config
            .site(&task.site)
            .ok_or_else(|| SkipReason::SiteNotFound(task.site.clone()))?;
        let feed_url = site
            .feed_url()
            .ok_or_else(|| SkipReason::FeedNotConfigured(site.id.clone()))?;
        if task.promo_only() && site.cookie().is_none() {
            return Err(SkipReason::CookieRequired(site.id.clone()));
        }
        let gateway = self
            .gateways
            .get(&task.downloader)
            .ok_or_else(|| SkipReason::DownloaderUnavailable(task.downloader.clone()))?;
        Ok((task, site, feed_url, gateway))
    }

    /// Volume then concurrency. An unknown downloading count closes the
    /// concurrency gate.
    async fn closed_gate(
        &self,
        task: &BrushTask,
        gateway: &dyn DownloaderGateway,
    ) -> Result<Option<Gate>, BrushError> {
        if let Some(ceiling) = task.retained_volume_ceiling {
            let retained = self.repository.retained_volume(&task.id)?;
            if ceiling * GIB <= retained as f64 {
                debug!(
                    task = %task.name,
                    "Retained volume {:.2} GiB reached ceiling {} GiB",
                    retained as f64 / GIB,
                    ceiling
                );
                return Ok(Some(Gate::Volume));
            }
        }

        if let Some(ceiling) = task.acquisition_rule.concurrent_download_ceiling {
            match gateway.get_downloading_count().await {
                Some(count) if count < ceiling => {}
                Some(count) => {
                    debug!(
                        task = %task.name,
                        "{} torrents downloading, ceiling is {}",
                        count,
                        ceiling
                    );
                    return Ok(Some(Gate::Concurrency));
                }
                None => {
                    metrics::GATEWAY_ERRORS
                        .with_label_values(&["downloading_count"])
                        .inc();
                    warn!(
                        task = %task.name,
                        "{} did not report its downloading count",
                        gateway.name()
                    );
                    return Ok(Some(Gate::Concurrency));
                }
            }
        }

        Ok(None)
    }

    fn stop_at_gate(&self, task: &BrushTask, gate: Gate, report: &mut AcquisitionReport) {
        metrics::GATE_STOPS.with_label_values(&[gate.as_str()]).inc();
        info!(task = %task.name, "Acquisition stopped by {} gate", gate.as_str());
        report.stopped_by_gate = true;
    }

    /// In-memory seen cache first, then the durable tracking record.
    async fn first_sighting(&self, task: &BrushTask, item: &FeedItem) -> Result<bool, BrushError> {
        let newly_seen = {
            let mut seen = self.seen.lock().await;
            seen.entry(task.id.clone())
                .or_insert_with(|| SeenCache::new(self.config.engine.seen_cache_capacity))
                .check_and_insert(&item.enclosure_url)
        };
        if !newly_seen {
            return Ok(false);
        }
        Ok(!self.repository.is_tracked(&task.id, &item.enclosure_url)?)
    }

    async fn forget(&self, task: &BrushTask, item: &FeedItem) {
        if let Some(cache) = self.seen.lock().await.get_mut(&task.id) {
            cache.forget(&item.enclosure_url);
        }
    }

    /// Why the task's acquisition rule rejects `item`, if it does. Errors
    /// only when the detail page cannot be read.
    async fn rejection(
        &self,
        task: &BrushTask,
        site: &SiteConfig,
        item: &FeedItem,
    ) -> Result<Option<String>, BrushError> {
        let rule = &task.acquisition_rule;

        if let Some(range) = &rule.size_range {
            if !range.evaluate_scaled(item.size_bytes as f64, GIB) {
                return Ok(Some(format!(
                    "size {:.2} GiB outside {}",
                    item.size_bytes as f64 / GIB,
                    range
                )));
            }
        }

        let patterns = AdhocFilter {
            include: rule.include.clone(),
            exclude: rule.exclude.clone(),
            rule: RuleRef::Skip,
            ..Default::default()
        };
        let outcome = self.filters.evaluate_adhoc(&candidate_attrs(item), &patterns);
        if !outcome.matched {
            return Ok(Some(outcome.rationale));
        }

        if rule.needs_probe() {
            let Some(detail_url) = item.detail_url.as_deref() else {
                return Ok(Some("no detail page to check promotion".to_string()));
            };
            let attrs = self.probe.probe(detail_url, site.cookie()).await?;
            if let Some(rationale) = attribute_failure(rule, &attrs) {
                return Ok(Some(rationale));
            }
        }

        if let (Some(limit), Some(age)) = (&rule.publish_age_limit_hours, item.age_hours(Utc::now())) {
            if limit.exceeds(age, 1.0) {
                return Ok(Some(format!("published {:.1} hours ago", age)));
            }
        }

        Ok(None)
    }

    /// Add, start and record one item. Returns the torrent id when the
    /// downloader accepted it. A failed add forgets the item and errors.
    async fn acquire(
        &self,
        task: &BrushTask,
        site: &SiteConfig,
        gateway: &dyn DownloaderGateway,
        item: &FeedItem,
    ) -> Result<Option<String>, BrushError> {
        let rule = &task.acquisition_rule;
        let mut request = AddTorrentRequest::new(
            item.enclosure_url.clone(),
            AddTorrentRequest::tracking_tag(&task.id),
        );
        if !task.transfer_after_complete {
            request.extra_tags.push(ORGANIZED_TAG.to_string());
        }
        request.upload_limit = rule.upload_limit_kib;
        request.download_limit = rule.download_limit_kib;
        request.cookie = site.cookie().map(str::to_string);

        let id = match gateway.add_torrent(request).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(task = %task.name, "{} did not report an id for {}", gateway.name(), item.title);
                return Ok(None);
            }
            Err(e) => {
                metrics::GATEWAY_ERRORS.with_label_values(&["add"]).inc();
                warn!(task = %task.name, "Failed to add {}: {}", item.title, e);
                self.forget(task, item).await;
                return Err(e.into());
            }
        };

        if let Err(e) = gateway.start_torrents(std::slice::from_ref(&id)).await {
            metrics::GATEWAY_ERRORS.with_label_values(&["start"]).inc();
            warn!(task = %task.name, "Failed to start {}: {}", item.title, e);
        }

        self.repository.insert_tracked_torrent(&NewTrackedTorrent {
            task_id: task.id.clone(),
            enclosure_url: item.enclosure_url.clone(),
            title: item.title.clone(),
            downloader: task.downloader.clone(),
            torrent_id: id.clone(),
            size_bytes: item.size_bytes,
        })?;
        self.repository.increment_acquired(&task.id)?;

        metrics::TORRENTS_ADDED.with_label_values(&["brush"]).inc();
        info!(task = %task.name, "Added {}", item.title);

        if task.send_notifications {
            let body = format!("{}: {}", task.name, item.title);
            if let Err(e) = self.notifier.notify("Brush torrent added", &body).await {
                warn!("Notification failed: {}", e);
            }
        }

        Ok(Some(id))
    }
}

/// Promotion, hit-and-run and peer checks on probed attributes. An unknown
/// peer count does not reject.
fn attribute_failure(rule: &AcquisitionRule, attrs: &TorrentAttributes) -> Option<String> {
    if let Some((required_ul, required_dl)) = rule.promo_class.required_factors() {
        let (ul, dl) = attrs.factors();
        if required_ul > ul || required_dl < dl {
            return Some(format!(
                "promotion {}x/{}x does not satisfy {}",
                ul,
                dl,
                rule.promo_class.as_str()
            ));
        }
    }

    if rule.exclude_hit_and_run && attrs.hit_and_run {
        return Some("hit-and-run torrent".to_string());
    }

    if let (Some(range), Some(peers)) = (&rule.peer_count_range, attrs.peer_count) {
        if !range.evaluate(peers as f64) {
            return Some(format!("{} seeders outside {}", peers, range));
        }
    }

    None
}

fn skip(task_id: &str, reason: SkipReason) -> CycleOutcome<AcquisitionReport> {
    metrics::CYCLE_SKIPS
        .with_label_values(&["acquisition", reason.kind()])
        .inc();
    info!(task = %task_id, "Skipping acquisition: {}", reason);
    CycleOutcome::Skipped(reason)
}

/// Feed item as seen by the pattern checks. The kind plays no part in them.
fn candidate_attrs(item: &FeedItem) -> CandidateAttrs {
    let mut attrs = CandidateAttrs::new(item.title.clone(), MediaKind::Movie, item.size_bytes);
    attrs.subtitle = item.description.clone();
    attrs
}
