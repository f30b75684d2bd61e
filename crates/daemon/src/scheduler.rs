//! Timers that drive the engine's `run_once` entry points.
//!
//! Every enabled brush task gets an acquisition worker on its own interval
//! and a lifecycle worker on the engine-wide lifecycle interval. The two
//! share a per-task mutex so cycles for the same task never overlap. One
//! more worker polls subscription feeds.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use seedwarden_core::{BrushAcquisitionLoop, BrushLifecycleLoop, Config, SubscriptionFeedLoop};

use crate::metrics;

/// The engines the scheduler drives.
pub struct Engines {
    pub acquisition: Arc<BrushAcquisitionLoop>,
    pub lifecycle: Arc<BrushLifecycleLoop>,
    pub subscriptions: Arc<SubscriptionFeedLoop>,
}

pub struct Scheduler {
    config: Arc<Config>,
    engines: Engines,
    task_locks: HashMap<String, Arc<Mutex<()>>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>, engines: Engines) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let task_locks = config
            .brush_tasks
            .iter()
            .map(|t| (t.id.clone(), Arc::new(Mutex::new(()))))
            .collect();

        Self {
            config,
            engines,
            task_locks,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn all workers.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        let mut workers = self.workers.lock().await;
        let lifecycle_every = minutes(self.config.engine.lifecycle_interval_minutes);

        for task in self.config.brush_tasks.iter().filter(|t| t.enabled) {
            let lock = self
                .task_locks
                .get(&task.id)
                .cloned()
                .unwrap_or_default();

            let engine = Arc::clone(&self.engines.acquisition);
            let task_id = task.id.clone();
            let guard = Arc::clone(&lock);
            workers.push(self.spawn_worker(
                format!("acquisition[{}]", task.id),
                minutes(task.interval_minutes),
                move || {
                    let engine = Arc::clone(&engine);
                    let task_id = task_id.clone();
                    let guard = Arc::clone(&guard);
                    async move {
                        let _held = guard.lock().await;
                        if let Err(e) = engine.run_once(&task_id).await {
                            warn!(task = %task_id, "Acquisition cycle failed: {}", e);
                        }
                    }
                },
            ));

            let engine = Arc::clone(&self.engines.lifecycle);
            let task_id = task.id.clone();
            workers.push(self.spawn_worker(
                format!("lifecycle[{}]", task.id),
                lifecycle_every,
                move || {
                    let engine = Arc::clone(&engine);
                    let task_id = task_id.clone();
                    let guard = Arc::clone(&lock);
                    async move {
                        let _held = guard.lock().await;
                        if let Err(e) = engine.run_once(&task_id).await {
                            warn!(task = %task_id, "Lifecycle cycle failed: {}", e);
                        }
                    }
                },
            ));
        }

        let engine = Arc::clone(&self.engines.subscriptions);
        workers.push(self.spawn_worker(
            "subscriptions".to_string(),
            minutes(self.config.engine.subscription_interval_minutes),
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    if let Err(e) = engine.run_once().await {
                        warn!("Subscription cycle failed: {}", e);
                    }
                }
            },
        ));

        metrics::SCHEDULER_WORKERS.set(workers.len() as i64);
        info!("Scheduler started with {} workers", workers.len());
    }

    /// Signal every worker and wait for in-flight cycles to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping scheduler");
        let _ = self.shutdown_tx.send(());

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker ended abnormally: {}", e);
            }
        }
        metrics::SCHEDULER_WORKERS.set(0);
        info!("Scheduler stopped");
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    fn spawn_worker<F, Fut>(&self, name: String, every: Duration, cycle: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!("{} worker started, every {:?}", name, every);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("{} worker received shutdown signal", name);
                        break;
                    }
                    _ = tokio::time::sleep(every) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        cycle().await;
                    }
                }
            }
            debug!("{} worker stopped", name);
        })
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.max(1) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedwarden_core::filter::FilterRuleEngine;
    use seedwarden_core::testing::{
        fixtures, MockFeedClient, MockGateway, MockMediaResolver, MockSiteProbe, RecordingNotifier,
    };
    use seedwarden_core::{GatewayRegistry, SqliteRepository, SubscriptionMatcher};

    fn scheduler() -> Scheduler {
        let mut disabled = fixtures::brush_task("t2", "site-a", "qb");
        disabled.enabled = false;
        let config = Arc::new(Config {
            sites: vec![fixtures::site("site-a")],
            downloaders: vec![fixtures::downloader("qb")],
            brush_tasks: vec![fixtures::brush_task("t1", "site-a", "qb"), disabled],
            ..Default::default()
        });

        let repository = Arc::new(SqliteRepository::in_memory().unwrap());
        let feeds = Arc::new(MockFeedClient::new());
        let probe = Arc::new(MockSiteProbe::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut gateways = GatewayRegistry::new();
        gateways.register("qb", Arc::new(MockGateway::new()));

        let engines = Engines {
            acquisition: Arc::new(BrushAcquisitionLoop::new(
                Arc::clone(&config),
                repository.clone(),
                feeds.clone(),
                probe.clone(),
                gateways.clone(),
                notifier.clone(),
            )),
            lifecycle: Arc::new(BrushLifecycleLoop::new(
                Arc::clone(&config),
                repository.clone(),
                gateways.clone(),
                notifier.clone(),
            )),
            subscriptions: Arc::new(SubscriptionFeedLoop::new(
                Arc::clone(&config),
                repository,
                feeds,
                Arc::new(MockMediaResolver::new()),
                SubscriptionMatcher::new(Arc::new(FilterRuleEngine::new(Vec::new())), probe),
                gateways,
                notifier,
            )),
        };
        Scheduler::new(config, engines)
    }

    #[tokio::test]
    async fn test_start_spawns_workers_for_enabled_tasks() {
        let scheduler = scheduler();
        scheduler.start().await;
        // acquisition + lifecycle for t1, plus subscriptions
        assert_eq!(scheduler.worker_count().await, 3);

        scheduler.stop().await;
        assert_eq!(scheduler.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_double_start_is_ignored() {
        let scheduler = scheduler();
        scheduler.start().await;
        scheduler.start().await;
        assert_eq!(scheduler.worker_count().await, 3);
        scheduler.stop().await;
    }

    #[test]
    fn test_minutes_never_zero() {
        assert_eq!(minutes(0), Duration::from_secs(60));
        assert_eq!(minutes(10), Duration::from_secs(600));
    }
}
