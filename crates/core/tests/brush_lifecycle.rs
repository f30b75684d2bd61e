//! Brush lifecycle integration tests.
//!
//! Removal decisions, cohort error handling and reconciliation of torrents
//! removed outside the engine.

use std::sync::Arc;

use tempfile::TempDir;

use seedwarden_core::{
    brush::{BrushError, BrushTask, RemovalReason, SkipReason},
    downloader::StatusFilter,
    repository::NewTrackedTorrent,
    testing::{fixtures, MockGateway, RecordingNotifier},
    threshold::ThresholdRule,
    BrushLifecycleLoop, Config, GatewayRegistry, Repository, SqliteRepository,
};

struct Harness {
    engine: BrushLifecycleLoop,
    repository: Arc<SqliteRepository>,
    gateway: MockGateway,
    notifier: RecordingNotifier,
    _temp_dir: TempDir,
}

impl Harness {
    fn new(tasks: Vec<BrushTask>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repository = Arc::new(
            SqliteRepository::new(&temp_dir.path().join("test.db"))
                .expect("Failed to create repository"),
        );
        let gateway = MockGateway::new();
        let notifier = RecordingNotifier::new();

        let mut gateways = GatewayRegistry::new();
        gateways.register("qb", Arc::new(gateway.clone()));
        let config = Config {
            sites: vec![fixtures::site("site-a")],
            downloaders: vec![fixtures::downloader("qb")],
            brush_tasks: tasks,
            ..Default::default()
        };

        let engine = BrushLifecycleLoop::new(
            Arc::new(config),
            repository.clone(),
            gateways,
            Arc::new(notifier.clone()),
        );

        Self {
            engine,
            repository,
            gateway,
            notifier,
            _temp_dir: temp_dir,
        }
    }

    /// Track `id` for `task_id` in the repository.
    fn track(&self, task_id: &str, id: &str) {
        self.repository
            .insert_tracked_torrent(&NewTrackedTorrent {
                task_id: task_id.to_string(),
                enclosure_url: format!("https://tracker.example/download.php?id={}", id),
                title: format!("Torrent {}", id),
                downloader: "qb".to_string(),
                torrent_id: id.to_string(),
                size_bytes: 1024,
            })
            .unwrap();
    }

    fn tracked(&self, task_id: &str) -> Vec<String> {
        let mut ids = self.repository.tracked_torrent_ids(task_id).unwrap();
        ids.sort();
        ids
    }
}

fn seed_time_task() -> BrushTask {
    let mut task = fixtures::brush_task("t1", "site-a", "qb");
    task.removal_rule.seeding_time_limit = ThresholdRule::parse("#720").unwrap();
    task
}

#[tokio::test]
async fn test_seed_time_limit_removes_old_torrents() {
    let harness = Harness::new(vec![seed_time_task()]);
    harness.track("t1", "old");
    harness.track("t1", "young");
    let mut old = fixtures::seeding_torrent("old", 31 * 24);
    old.uploaded_bytes = 4096;
    old.downloaded_bytes = 1024;
    harness.gateway.add_mock_torrent(old);
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("young", 29 * 24));

    let outcome = harness.engine.run_once("t1").await.unwrap();
    let report = outcome.report().expect("cycle should complete");

    assert_eq!(
        report.removed,
        vec![("old".to_string(), RemovalReason::SeedTime)]
    );
    assert!(report.reconciled.is_empty());
    assert_eq!(
        harness.gateway.delete_calls(),
        vec![(vec!["old".to_string()], true)]
    );
    assert_eq!(harness.tracked("t1"), vec!["young".to_string()]);

    let counters = harness.repository.task_counters("t1").unwrap();
    assert_eq!(counters.removed, 1);
    assert_eq!(counters.total_uploaded, 4096);
    assert_eq!(counters.total_downloaded, 1024);

    let records = harness.repository.tracked_torrents("t1").unwrap();
    let old_record = records.iter().find(|r| r.torrent_id == "old").unwrap();
    assert_eq!(old_record.removal_reason, Some(RemovalReason::SeedTime));
    assert!(old_record.removed_at.is_some());
}

#[tokio::test]
async fn test_failed_cohort_query_leaves_torrents_alone() {
    let harness = Harness::new(vec![seed_time_task()]);
    harness.track("t1", "old");
    harness.track("t1", "vanished");
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("old", 31 * 24));
    harness.gateway.set_cohort_error(StatusFilter::Completed, true);

    let outcome = harness.engine.run_once("t1").await.unwrap();
    let report = outcome.report().unwrap();

    assert_eq!(report.cohort_errors, 1);
    assert!(report.removed.is_empty());
    assert!(report.reconciled.is_empty());
    assert!(harness.gateway.delete_calls().is_empty());
    assert_eq!(
        harness.tracked("t1"),
        vec!["old".to_string(), "vanished".to_string()]
    );
}

#[tokio::test]
async fn test_externally_removed_torrents_are_forgotten() {
    let harness = Harness::new(vec![seed_time_task()]);
    harness.track("t1", "alive");
    harness.track("t1", "gone");
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("alive", 1));

    let outcome = harness.engine.run_once("t1").await.unwrap();
    let report = outcome.report().unwrap();

    assert_eq!(report.reconciled, vec!["gone".to_string()]);
    assert!(harness.gateway.delete_calls().is_empty());
    assert_eq!(harness.tracked("t1"), vec!["alive".to_string()]);
    assert_eq!(harness.repository.task_counters("t1").unwrap().removed, 1);

    // the history row stays, so the enclosure is not acquired again
    assert!(harness
        .repository
        .is_tracked("t1", "https://tracker.example/download.php?id=gone")
        .unwrap());
}

#[tokio::test]
async fn test_download_time_limit_applies_to_downloading_cohort() {
    let mut task = fixtures::brush_task("t1", "site-a", "qb");
    task.removal_rule.download_time_limit = Some(ThresholdRule::value(24.0));
    let harness = Harness::new(vec![task]);
    harness.track("t1", "stuck");
    harness.track("t1", "seeding");
    harness
        .gateway
        .add_mock_torrent(fixtures::downloading_torrent("stuck", 48));
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("seeding", 48));

    let outcome = harness.engine.run_once("t1").await.unwrap();

    assert_eq!(
        outcome.report().unwrap().removed,
        vec![("stuck".to_string(), RemovalReason::DownloadTime)]
    );
}

#[tokio::test]
async fn test_removals_are_deleted_in_one_batch() {
    let mut task = seed_time_task();
    task.send_notifications = true;
    let harness = Harness::new(vec![task]);
    for id in ["a", "b", "c"] {
        harness.track("t1", id);
        harness
            .gateway
            .add_mock_torrent(fixtures::seeding_torrent(id, 40 * 24));
    }

    let outcome = harness.engine.run_once("t1").await.unwrap();

    assert_eq!(outcome.report().unwrap().removed.len(), 3);
    let calls = harness.gateway.delete_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.len(), 3);
    assert_eq!(harness.notifier.count(), 3);
    assert!(harness.tracked("t1").is_empty());
}

#[tokio::test]
async fn test_delete_failure_keeps_tracking() {
    let harness = Harness::new(vec![seed_time_task()]);
    harness.track("t1", "old");
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("old", 31 * 24));
    harness.gateway.set_next_delete_error("backend busy");

    let result = harness.engine.run_once("t1").await;

    assert!(matches!(result, Err(BrushError::Gateway(_))));
    assert_eq!(harness.tracked("t1"), vec!["old".to_string()]);
    assert_eq!(harness.repository.task_counters("t1").unwrap().removed, 0);
}

#[tokio::test]
async fn test_nothing_tracked_skips() {
    let harness = Harness::new(vec![seed_time_task()]);

    let outcome = harness.engine.run_once("t1").await.unwrap();

    assert_eq!(outcome.skip_reason(), Some(&SkipReason::NothingTracked));
    assert_eq!(harness.gateway.list_calls(), 0);
}

#[tokio::test]
async fn test_run_all_covers_enabled_tasks() {
    let mut disabled = fixtures::brush_task("t2", "site-a", "qb");
    disabled.enabled = false;
    disabled.removal_rule.seeding_time_limit = Some(ThresholdRule::value(1.0));
    let harness = Harness::new(vec![seed_time_task(), disabled]);
    harness.track("t1", "old");
    harness.track("t2", "other");
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("old", 31 * 24));
    harness
        .gateway
        .add_mock_torrent(fixtures::seeding_torrent("other", 31 * 24));

    let results = harness.engine.run_all().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "t1");
    assert_eq!(harness.gateway.deleted_ids(), vec!["old".to_string()]);
    assert_eq!(harness.tracked("t2"), vec!["other".to_string()]);
}
