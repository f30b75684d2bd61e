//! Matching of resolved feed candidates against subscriptions.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::collaborators::{SiteProbe, TorrentAttributes};
use crate::filter::{pattern, AdhocFilter, FilterRuleEngine, MediaKind, RuleRef};

use super::{MatchResult, ResolvedCandidate, Subscription, SubscriptionBinding};

/// Binds candidates to the first subscription they structurally match.
pub struct SubscriptionMatcher {
    filters: Arc<FilterRuleEngine>,
    probe: Arc<dyn SiteProbe>,
}

impl SubscriptionMatcher {
    pub fn new(filters: Arc<FilterRuleEngine>, probe: Arc<dyn SiteProbe>) -> Self {
        Self { filters, probe }
    }

    /// Match `candidate` against `subscriptions` in stored order.
    ///
    /// The first structural match is final: if its filters reject the
    /// candidate, later subscriptions are not tried.
    pub async fn match_candidate(
        &self,
        candidate: &ResolvedCandidate,
        subscriptions: &[Subscription],
        site_filter_rule: Option<&str>,
    ) -> MatchResult {
        let media = &candidate.media;
        let Some(subscription) = subscriptions.iter().find(|sub| {
            sub.follows_site(&candidate.site)
                && sub.kind == media.kind
                && structural_match(sub, candidate)
        }) else {
            return MatchResult::rejected(format!(
                "{} identified as {} is not subscribed",
                candidate.item.title,
                describe_media(candidate)
            ));
        };

        debug!(
            "Candidate {} structurally matches subscription {}",
            candidate.item.title, subscription.id
        );

        let attributes = self.probe_attributes(candidate).await;

        let mut attrs = media.candidate_attrs(
            &candidate.item.title,
            candidate.item.description.as_deref(),
            candidate.item.size_bytes,
        );
        if let Some(found) = attributes {
            let (upload, download) = found.factors();
            attrs = attrs.with_factors(upload, download);
        }

        let filter = AdhocFilter {
            restype: subscription.filter_restype.clone(),
            pix: subscription.filter_pix.clone(),
            team: subscription.filter_team.clone(),
            rule: RuleRef::group_or_default(
                subscription.filter_rule.as_deref().or(site_filter_rule),
            ),
            ..AdhocFilter::default()
        };
        let outcome = self.filters.evaluate_adhoc(&attrs, &filter);

        if !outcome.matched {
            return MatchResult::rejected(format!(
                "{} rejected for subscription {}: {}",
                candidate.item.title, subscription.title, outcome.rationale
            ));
        }

        let mut messages = vec![format!(
            "{} identified as {} matches subscription {}",
            candidate.item.title,
            describe_media(candidate),
            subscription.title
        )];
        if let Some(description) = candidate.item.description.as_deref() {
            messages.push(format!("description: {}", description));
        }

        MatchResult {
            matched: true,
            messages,
            binding: Some(SubscriptionBinding {
                subscription_id: subscription.id.clone(),
                kind: subscription.kind,
                season_number: subscription
                    .season_number()
                    .filter(|_| !subscription.any_season())
                    .or(media.season_number),
                priority: outcome.priority,
                upload_factor: attrs.upload_factor,
                download_factor: attrs.download_factor,
                hit_and_run: attributes.map(|a| a.hit_and_run).unwrap_or(false),
                save_path: subscription.save_path.clone(),
            }),
        }
    }

    /// Detail-page attributes, when the site allows probing. A failed probe
    /// leaves the factors unknown.
    async fn probe_attributes(&self, candidate: &ResolvedCandidate) -> Option<TorrentAttributes> {
        if !candidate.probe_details {
            return None;
        }
        let detail_url = candidate.item.detail_url.as_deref()?;
        match self.probe.probe(detail_url, candidate.cookie.as_deref()).await {
            Ok(attributes) => Some(attributes),
            Err(e) => {
                warn!("Failed to probe {}: {}", detail_url, e);
                None
            }
        }
    }
}

/// Whether `subscription` names the media of `candidate`, ignoring filters.
fn structural_match(subscription: &Subscription, candidate: &ResolvedCandidate) -> bool {
    let media = &candidate.media;

    if !subscription.fuzzy {
        match subscription.authoritative_identity() {
            Some(identity) => {
                if media.identity.as_deref() != Some(identity) {
                    return false;
                }
            }
            None => {
                // metadata sources disagree on release years by one at most
                if let Some(year) = subscription.year {
                    match media.year {
                        Some(found) if (found - year).abs() <= 1 => {}
                        _ => return false,
                    }
                }
                if subscription.title != media.title {
                    return false;
                }
            }
        }
        return season_matches(subscription, candidate);
    }

    if !season_matches(subscription, candidate) {
        return false;
    }
    if let Some(year) = subscription.year {
        if media.year != Some(year) {
            return false;
        }
    }

    let year = media.year.map(|y| y.to_string()).unwrap_or_default();
    let haystack = format!("{} {} {}", candidate.item.title, media.title, year);
    pattern::search(&subscription.title, &haystack) == Some(true)
        || haystack.contains(subscription.title.as_str())
}

/// TV subscriptions pinned to a season only take that season. `S00` takes any.
fn season_matches(subscription: &Subscription, candidate: &ResolvedCandidate) -> bool {
    if subscription.kind != MediaKind::Tv || subscription.any_season() {
        return true;
    }
    match subscription.season_number() {
        Some(season) => candidate.media.season_number == Some(season),
        None => true,
    }
}

fn describe_media(candidate: &ResolvedCandidate) -> String {
    let media = &candidate.media;
    let mut text = media.title.clone();
    if let Some(year) = media.year {
        text.push_str(&format!(" ({})", year));
    }
    if let Some(season) = media.season_number {
        text.push_str(&format!(" S{:02}", season));
    }
    if let (Some(first), Some(last)) = (media.episodes.first(), media.episodes.last()) {
        if first == last {
            text.push_str(&format!("E{:02}", first));
        } else {
            text.push_str(&format!("E{:02}-E{:02}", first, last));
        }
    }
    text
}
