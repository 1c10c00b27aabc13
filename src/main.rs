//! Rota Proxy Server - Entry Point
//!
//! Starts the ingress proxy and the admin API with graceful shutdown support.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod database;
mod error;
mod models;
mod proxy;
mod repository;
mod services;

use api::ApiServer;
use config::Config;
use database::Database;
use proxy::health::{HealthProber, HealthProberConfig, HealthProberHandle};
use proxy::rotation::{build_selector, DynamicSelector, ProxySelector};
use proxy::server::ProxyServer;
use proxy::{DbAccountingStore, Dispatcher};
use repository::{ProxyRepository, RequestLogRepository, SettingsRepository};
use services::{SettingsWatcher, SettingsWatcherConfig, SettingsWatcherHandle};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration before anything else; a bad environment is a
    // startup failure with a non-zero exit
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rota={},tower_http=warn", config.log.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rota Proxy Server");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Startup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> error::Result<()> {
    // Connect to database
    let db = Database::new(&config).await?;
    info!("Connected to database");

    // Run migrations
    db.run_migrations().await?;
    info!("Database migrations complete");

    // Initialize TimescaleDB if available
    if let Err(e) = database::timescale::setup_timescaledb(db.pool()).await {
        info!(
            "TimescaleDB setup skipped or failed: {} (this is OK if not using TimescaleDB)",
            e
        );
    }

    let proxy_repo = ProxyRepository::new(db.pool().clone());
    let log_repo = RequestLogRepository::new(db.pool().clone());
    let settings_repo = SettingsRepository::new(db.pool().clone());

    // Load and validate rotation settings; an invalid record at startup is a
    // configuration error
    let mut rotation = settings_repo.get_rotation().await?;
    rotation.canonicalize();
    rotation.validate()?;
    info!(method = %rotation.method, "Rotation settings loaded");

    // Build the initial selector and load the active pool
    let initial = build_selector(&rotation, log_repo.clone())?;
    let selector = Arc::new(DynamicSelector::new(initial));
    let proxies = proxy_repo.list_active().await?;
    selector.refresh(proxies).await?;
    info!("Loaded {} active proxies", selector.available_count());

    // Settings fan out to dispatchers over a watch channel
    let (settings_tx, settings_rx) = watch::channel(rotation);

    // Create shutdown channel for the servers
    let (shutdown_tx, _) = watch::channel(false);

    // Start the settings watcher
    let (watcher_handle, watcher_shutdown) = SettingsWatcherHandle::new();
    let settings_watcher = SettingsWatcher::new(
        db.clone(),
        SettingsWatcherConfig::default(),
        selector.clone(),
        settings_tx,
    );
    let watcher_task = tokio::spawn(async move {
        settings_watcher.run(watcher_shutdown).await;
    });

    // Start the health prober
    let (prober_handle, prober_shutdown) = HealthProberHandle::new();
    let prober = HealthProber::new(db.clone(), HealthProberConfig::default(), selector.clone());
    let prober_task = tokio::spawn(async move {
        prober.run(prober_shutdown).await;
    });

    // Create the dispatcher and the ingress server
    let store = Arc::new(DbAccountingStore::new(proxy_repo, log_repo));
    let dispatcher = Arc::new(Dispatcher::new(selector.clone(), store, settings_rx));
    let proxy_server = ProxyServer::new(config.proxy.clone(), dispatcher);

    // Create the API server
    let api_server = ApiServer::new(config.api.clone(), config.clone(), db.clone(), selector);

    // Start servers
    let proxy_shutdown = shutdown_tx.subscribe();
    let api_shutdown = shutdown_tx.subscribe();

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(proxy_shutdown).await {
            error!("Proxy server error: {}", e);
        }
    });

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Servers started - Proxy: {}:{}, API: {}:{}",
        config.proxy.host, config.proxy.port, config.api.host, config.api.port
    );

    // Wait for shutdown signal; runtime database loss never exits the process
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Send shutdown signal to all services
    let _ = shutdown_tx.send(true);
    watcher_handle.shutdown();
    prober_handle.shutdown();

    // Wait for all tasks to complete
    let _ = tokio::join!(proxy_task, api_task, watcher_task, prober_task);

    db.close().await;

    info!("Rota Proxy Server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
