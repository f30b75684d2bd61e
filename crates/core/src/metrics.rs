//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Feed polling (fetches, items)
//! - Brush acquisition and lifecycle (adds, removals, gates, skips)
//! - Subscriptions (matches, finished subscriptions)
//! - Downloader gateways (errors per operation)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Feeds
// =============================================================================

/// Feed fetches by site and result.
pub static FEED_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_feed_fetches_total", "Total feed fetches"),
        &["site", "result"], // "success", "error"
    )
    .unwrap()
});

/// Feed items inspected, by consuming loop.
pub static FEED_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_feed_items_total", "Total feed items inspected"),
        &["source"], // "brush", "subscription"
    )
    .unwrap()
});

// =============================================================================
// Engine loops
// =============================================================================

/// Cycle duration in seconds.
pub static CYCLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedwarden_cycle_duration_seconds",
            "Duration of one engine cycle",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["loop"], // "acquisition", "lifecycle", "subscription"
    )
    .unwrap()
});

/// Cycles skipped on a failed precondition.
pub static CYCLE_SKIPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_cycle_skips_total", "Total skipped cycles"),
        &["loop", "reason"],
    )
    .unwrap()
});

/// Torrents added to a downloader.
pub static TORRENTS_ADDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_torrents_added_total", "Total torrents added"),
        &["source"], // "brush", "subscription"
    )
    .unwrap()
});

/// Candidates rejected by acquisition rules or filters.
pub static CANDIDATES_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedwarden_candidates_rejected_total",
            "Total candidates rejected",
        ),
        &["source"],
    )
    .unwrap()
});

/// Acquisition cycles ended by a gate.
pub static GATE_STOPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedwarden_gate_stops_total",
            "Total acquisition cycles stopped by a gate",
        ),
        &["gate"], // "volume", "concurrency", "unreachable"
    )
    .unwrap()
});

/// Torrents removed by the lifecycle loop, by reason tag.
pub static TORRENTS_REMOVED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedwarden_torrents_removed_total", "Total torrents removed"),
        &["reason"],
    )
    .unwrap()
});

/// Tracked torrents dropped because the downloader no longer has them.
pub static TORRENTS_RECONCILED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seedwarden_torrents_reconciled_total",
        "Total tracked torrents dropped as externally removed",
    )
    .unwrap()
});

/// Subscriptions moved to the finished state.
pub static SUBSCRIPTIONS_FINISHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seedwarden_subscriptions_finished_total",
        "Total subscriptions finished",
    )
    .unwrap()
});

// =============================================================================
// Downloader gateways
// =============================================================================

/// Gateway call failures by operation.
pub static GATEWAY_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedwarden_gateway_errors_total",
            "Total downloader gateway errors",
        ),
        &["operation"], // "query", "add", "start", "delete", "count"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Feeds
        Box::new(FEED_FETCHES.clone()),
        Box::new(FEED_ITEMS.clone()),
        // Engine loops
        Box::new(CYCLE_DURATION.clone()),
        Box::new(CYCLE_SKIPS.clone()),
        Box::new(TORRENTS_ADDED.clone()),
        Box::new(CANDIDATES_REJECTED.clone()),
        Box::new(GATE_STOPS.clone()),
        Box::new(TORRENTS_REMOVED.clone()),
        Box::new(TORRENTS_RECONCILED.clone()),
        Box::new(SUBSCRIPTIONS_FINISHED.clone()),
        // Gateways
        Box::new(GATEWAY_ERRORS.clone()),
    ]
}
