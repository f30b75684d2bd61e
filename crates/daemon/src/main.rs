mod metrics;
mod routes;
mod scheduler;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use seedwarden_core::{
    collaborators::{HttpSiteProbe, LogNotifier, TitleMediaResolver},
    feed::HttpFeedClient,
    filter::FilterRuleEngine,
    load_config, validate_config, BrushAcquisitionLoop, BrushLifecycleLoop, GatewayRegistry,
    Repository, SanitizedConfig, SqliteRepository, SubscriptionFeedLoop, SubscriptionMatcher,
};

use routes::create_router;
use scheduler::{Engines, Scheduler};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("SEEDWARDEN_LOG_FORMAT").as_deref() == Ok("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("SEEDWARDEN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Invalid configuration")?;
    info!(
        "Configuration loaded: {}",
        serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default()
    );
    let config = Arc::new(config);

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
    }
    let repository = Arc::new(
        SqliteRepository::new(&config.database.path)
            .with_context(|| format!("Failed to open database at {:?}", config.database.path))?,
    );
    for subscription in &config.subscriptions {
        repository
            .upsert_subscription(subscription)
            .with_context(|| format!("Failed to store subscription '{}'", subscription.id))?;
    }
    info!("Database ready at {:?}", config.database.path);

    let gateways = GatewayRegistry::from_profiles(&config.downloaders)
        .context("Failed to create downloader gateways")?;
    info!("Registered {} downloader gateways", gateways.len());

    let timeout = Duration::from_secs(config.engine.request_timeout_secs);
    let feeds = Arc::new(
        HttpFeedClient::new(timeout, &config.engine.user_agent)
            .context("Failed to create feed client")?,
    );
    let probe = Arc::new(
        HttpSiteProbe::new(timeout, &config.engine.user_agent)
            .context("Failed to create site probe")?,
    );
    let notifier = Arc::new(LogNotifier::default());
    let matcher = SubscriptionMatcher::new(
        Arc::new(FilterRuleEngine::new(config.filter_groups.clone())),
        probe.clone(),
    );

    let engines = Engines {
        acquisition: Arc::new(BrushAcquisitionLoop::new(
            Arc::clone(&config),
            repository.clone(),
            feeds.clone(),
            probe,
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
            Arc::new(TitleMediaResolver::new()),
            matcher,
            gateways,
            notifier,
        )),
    };

    let scheduler = Scheduler::new(Arc::clone(&config), engines);
    scheduler.start().await;

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting seedwarden v{} on {}", VERSION, addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, create_router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
