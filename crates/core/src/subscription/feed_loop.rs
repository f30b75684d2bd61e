//! Subscription feed polling.
//!
//! One cycle pulls the feed of every site a subscription follows, resolves
//! and matches each new item, then downloads the accepted items best-first
//! while keeping episode gaps and subscription states current.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::collaborators::{MediaResolver, Notifier};
use crate::config::{Config, SiteConfig};
use crate::downloader::{AddTorrentRequest, GatewayRegistry};
use crate::feed::{FeedClient, FeedItem};
use crate::filter::MediaKind;
use crate::metrics;
use crate::repository::Repository;

use super::{
    EpisodeGapTracker, ResolvedCandidate, Subscription, SubscriptionBinding, SubscriptionError,
    SubscriptionMatcher, SubscriptionState,
};

/// What a subscription cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub sites_polled: usize,
    pub items_checked: usize,
    /// Items accepted for download.
    pub matched: usize,
    /// Titles of the items added to a downloader.
    pub added: Vec<String>,
    /// Ids of subscriptions finished this cycle.
    pub finished: Vec<String>,
}

struct Directive {
    candidate: ResolvedCandidate,
    binding: SubscriptionBinding,
}

/// Episode gap of a TV subscription for the current cycle. `None` means the
/// episode count is unknown and gaps are not tracked.
type Gaps = HashMap<String, Option<BTreeSet<u32>>>;

pub struct SubscriptionFeedLoop {
    config: Arc<Config>,
    repository: Arc<dyn Repository>,
    feeds: Arc<dyn FeedClient>,
    resolver: Arc<dyn MediaResolver>,
    matcher: SubscriptionMatcher,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
}

impl SubscriptionFeedLoop {
    pub fn new(
        config: Arc<Config>,
        repository: Arc<dyn Repository>,
        feeds: Arc<dyn FeedClient>,
        resolver: Arc<dyn MediaResolver>,
        matcher: SubscriptionMatcher,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            repository,
            feeds,
            resolver,
            matcher,
            gateways,
            notifier,
        }
    }

    /// Poll every followed feed once and download what the active
    /// subscriptions accept.
    pub async fn run_once(&self) -> Result<SubscriptionReport, SubscriptionError> {
        let started = Instant::now();
        let mut report = SubscriptionReport::default();

        let mut subscriptions = self.repository.list_subscriptions(SubscriptionState::Rss)?;
        if subscriptions.is_empty() {
            debug!("No active subscriptions");
            return Ok(report);
        }

        let all_sites = subscriptions.iter().any(|s| s.rss_sites.is_empty());
        let followed: HashSet<String> = subscriptions
            .iter()
            .flat_map(|s| s.rss_sites.iter().cloned())
            .collect();

        let mut gaps = Gaps::new();
        let mut directives = Vec::new();

        for site in &self.config.sites {
            if !all_sites && !followed.contains(&site.id) {
                continue;
            }
            let Some(url) = site.feed_url() else {
                info!("Site {} has no feed url, skipping", site.display_name());
                continue;
            };

            let items = match self.feeds.fetch(url).await {
                Ok(items) => {
                    metrics::FEED_FETCHES.with_label_values(&[&site.id, "success"]).inc();
                    items
                }
                Err(e) => {
                    metrics::FEED_FETCHES.with_label_values(&[&site.id, "error"]).inc();
                    warn!("Failed to fetch feed of {}: {}", site.display_name(), e);
                    continue;
                }
            };
            report.sites_polled += 1;
            info!("Processing {} items from {}", items.len(), site.display_name());

            for item in items {
                report.items_checked += 1;
                metrics::FEED_ITEMS.with_label_values(&["subscription"]).inc();
                if let Some(directive) = self
                    .check_item(site, item, &mut subscriptions, &mut gaps, &mut report)
                    .await?
                {
                    directives.push(directive);
                }
            }
        }

        report.matched = directives.len();
        // stable: equal keys keep feed order
        directives.sort_by_key(|d| (Reverse(d.binding.priority), Reverse(d.candidate.site_order)));

        for directive in directives {
            self.download(directive, &subscriptions, &mut gaps, &mut report)
                .await?;
        }

        metrics::CYCLE_DURATION
            .with_label_values(&["subscription"])
            .observe(started.elapsed().as_secs_f64());
        info!(
            "Subscription cycle done: {} matched, {} added, {} finished",
            report.matched,
            report.added.len(),
            report.finished.len()
        );
        Ok(report)
    }

    /// Dedup, resolve and match one item. Returns a directive when the item
    /// should be downloaded.
    async fn check_item(
        &self,
        site: &SiteConfig,
        item: FeedItem,
        subscriptions: &mut Vec<Subscription>,
        gaps: &mut Gaps,
        report: &mut SubscriptionReport,
    ) -> Result<Option<Directive>, SubscriptionError> {
        if self.repository.is_enclosure_seen(&item.enclosure_url)? {
            debug!("{} was already handled", item.title);
            return Ok(None);
        }

        let media = match self
            .resolver
            .resolve(&item.title, item.description.as_deref())
            .await
        {
            Ok(Some(media)) => media,
            Ok(None) => {
                debug!("{} is not recognisable media", item.title);
                return Ok(None);
            }
            Err(e) => {
                warn!("Failed to resolve {}: {}", item.title, e);
                return Ok(None);
            }
        };

        let candidate = ResolvedCandidate {
            item,
            media,
            site: site.id.clone(),
            site_order: site.order,
            probe_details: site.parse_details,
            cookie: site.cookie().map(str::to_string),
        };

        let result = self
            .matcher
            .match_candidate(&candidate, subscriptions, site.filter_rule.as_deref())
            .await;
        for message in &result.messages {
            info!("{}", message);
        }
        let Some(binding) = result.binding.filter(|_| result.matched) else {
            metrics::CANDIDATES_REJECTED
                .with_label_values(&["subscription"])
                .inc();
            return Ok(None);
        };
        let Some(subscription) = subscriptions
            .iter()
            .find(|s| s.id == binding.subscription_id)
            .cloned()
        else {
            return Ok(None);
        };

        if !self
            .still_wanted(&subscription, &candidate, subscriptions, gaps, report)
            .await?
        {
            return Ok(None);
        }

        self.repository
            .mark_enclosure_seen(&candidate.item.enclosure_url, &candidate.item.title)?;
        Ok(Some(Directive { candidate, binding }))
    }

    /// Library and episode-gap checks for a matched item. Finishes the
    /// subscription when the library already satisfies it.
    async fn still_wanted(
        &self,
        subscription: &Subscription,
        candidate: &ResolvedCandidate,
        subscriptions: &mut Vec<Subscription>,
        gaps: &mut Gaps,
        report: &mut SubscriptionReport,
    ) -> Result<bool, SubscriptionError> {
        let consult_library = !subscription.fuzzy && !subscription.over_edition;

        if subscription.kind == MediaKind::Movie {
            if consult_library && self.in_library(candidate, None).await {
                info!("Movie {} is already in the library", subscription.title);
                self.finish(subscription, subscriptions, report)?;
                return Ok(false);
            }
            return Ok(true);
        }

        if !gaps.contains_key(&subscription.id) {
            let gap = self.compute_gap(subscription, candidate, consult_library).await?;
            gaps.insert(subscription.id.clone(), gap);
        }

        let Some(Some(gap)) = gaps.get(&subscription.id) else {
            return Ok(true);
        };
        if EpisodeGapTracker::is_complete(gap) {
            info!("All episodes of {} are present", subscription.title);
            self.finish(subscription, subscriptions, report)?;
            return Ok(false);
        }
        let episodes = &candidate.media.episodes;
        if !episodes.is_empty() && episodes.is_disjoint(gap) {
            debug!(
                "{} carries no missing episode of {}",
                candidate.item.title, subscription.title
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn compute_gap(
        &self,
        subscription: &Subscription,
        candidate: &ResolvedCandidate,
        consult_library: bool,
    ) -> Result<Option<BTreeSet<u32>>, SubscriptionError> {
        let state = subscription.episode_state();
        let total = subscription
            .total_episodes
            .or(candidate.media.total_episodes);
        if state.lack_episodes.is_none() && total.is_none() {
            return Ok(None);
        }

        let library = if consult_library {
            self.library_episodes(candidate, subscription.season_number())
                .await
        } else {
            None
        };

        let remaining = EpisodeGapTracker::remaining(&state, library.as_ref(), total.unwrap_or(0));
        if state.lack_episodes.as_ref() != Some(&remaining) {
            self.repository
                .update_lack_episodes(&subscription.id, &remaining)?;
            info!(
                "{} is missing {} episodes",
                subscription.title,
                remaining.len()
            );
        }
        Ok(Some(remaining))
    }

    async fn in_library(&self, candidate: &ResolvedCandidate, season: Option<u32>) -> bool {
        match self.resolver.library_report(&candidate.media, season).await {
            Ok(report) => report.map(|r| r.present).unwrap_or(false),
            Err(e) => {
                warn!("Library lookup failed for {}: {}", candidate.media.title, e);
                false
            }
        }
    }

    async fn library_episodes(
        &self,
        candidate: &ResolvedCandidate,
        season: Option<u32>,
    ) -> Option<BTreeSet<u32>> {
        let season = season.or(candidate.media.season_number);
        match self.resolver.library_report(&candidate.media, season).await {
            Ok(report) => report.map(|r| r.episodes),
            Err(e) => {
                warn!("Library lookup failed for {}: {}", candidate.media.title, e);
                None
            }
        }
    }

    fn finish(
        &self,
        subscription: &Subscription,
        subscriptions: &mut Vec<Subscription>,
        report: &mut SubscriptionReport,
    ) -> Result<(), SubscriptionError> {
        self.repository.finish_subscription(&subscription.id)?;
        subscriptions.retain(|s| s.id != subscription.id);
        report.finished.push(subscription.id.clone());
        metrics::SUBSCRIPTIONS_FINISHED.inc();
        info!("Subscription {} finished", subscription.title);
        Ok(())
    }

    async fn download(
        &self,
        directive: Directive,
        subscriptions: &[Subscription],
        gaps: &mut Gaps,
        report: &mut SubscriptionReport,
    ) -> Result<(), SubscriptionError> {
        let Directive { candidate, binding } = directive;
        let sub_id = &binding.subscription_id;
        if report.finished.contains(sub_id) {
            return Ok(());
        }
        let Some(subscription) = subscriptions.iter().find(|s| &s.id == sub_id) else {
            return Ok(());
        };

        let episodes = &candidate.media.episodes;
        if let Some(Some(gap)) = gaps.get(sub_id) {
            if !episodes.is_empty() && episodes.is_disjoint(gap) {
                debug!("{} is covered by a better release", candidate.item.title);
                return Ok(());
            }
        }

        let Some(downloader) = subscription
            .downloader
            .as_deref()
            .or(self.gateways.default_id())
        else {
            warn!("No downloader configured, cannot add {}", candidate.item.title);
            return Ok(());
        };
        let Some(gateway) = self.gateways.get(downloader) else {
            warn!("Downloader {} is not available", downloader);
            return Ok(());
        };

        let tag = AddTorrentRequest::tracking_tag(&format!("sub-{}", sub_id));
        let mut request = AddTorrentRequest::new(candidate.item.enclosure_url.clone(), tag);
        request.save_dir = binding.save_path.clone();
        request.cookie = candidate.cookie.clone();

        let id = match gateway.add_torrent(request).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!("{} refused {}", gateway.name(), candidate.item.title);
                return Ok(());
            }
            Err(e) => {
                metrics::GATEWAY_ERRORS.with_label_values(&["add"]).inc();
                warn!("Failed to add {}: {}", candidate.item.title, e);
                return Ok(());
            }
        };
        if let Err(e) = gateway.start_torrents(std::slice::from_ref(&id)).await {
            metrics::GATEWAY_ERRORS.with_label_values(&["start"]).inc();
            warn!("Failed to start {}: {}", candidate.item.title, e);
        }

        metrics::TORRENTS_ADDED.with_label_values(&["subscription"]).inc();
        info!("Added {} for subscription {}", candidate.item.title, subscription.title);
        report.added.push(candidate.item.title.clone());

        if self.config.engine.notifications {
            let body = format!("{} ({})", candidate.item.title, subscription.title);
            if let Err(e) = self.notifier.notify("Subscription download started", &body).await {
                warn!("Notification failed: {}", e);
            }
        }

        match subscription.kind {
            MediaKind::Movie => {
                self.repository.finish_subscription(sub_id)?;
                report.finished.push(sub_id.clone());
                metrics::SUBSCRIPTIONS_FINISHED.inc();
                info!("Subscription {} finished", subscription.title);
            }
            MediaKind::Tv => {
                let Some(Some(gap)) = gaps.get_mut(sub_id) else {
                    return Ok(());
                };
                if episodes.is_empty() {
                    // a season pack covers the whole season
                    gap.clear();
                } else {
                    gap.retain(|e| !episodes.contains(e));
                }
                self.repository.update_lack_episodes(sub_id, gap)?;
                if EpisodeGapTracker::is_complete(gap) {
                    self.repository.finish_subscription(sub_id)?;
                    report.finished.push(sub_id.clone());
                    metrics::SUBSCRIPTIONS_FINISHED.inc();
                    info!("Subscription {} finished", subscription.title);
                } else {
                    info!("{} still misses {} episodes", subscription.title, gap.len());
                }
            }
        }
        Ok(())
    }
}
