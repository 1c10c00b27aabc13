//! Settings watcher
//!
//! Polls the rotation settings row and reconfigures the active selector when
//! it changes. In-flight dispatches keep the selector they started with; the
//! swap is atomic and happens at most once per observed change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::database::Database;
use crate::error::Result;
use crate::models::RotationSettings;
use crate::proxy::rotation::{build_selector, DynamicSelector};
use crate::repository::{RequestLogRepository, SettingsRepository};

/// Settings watcher configuration
#[derive(Clone)]
pub struct SettingsWatcherConfig {
    /// How often to poll the settings store
    pub poll_interval: Duration,
}

impl Default for SettingsWatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Watches rotation settings and drives selector reconfiguration
pub struct SettingsWatcher {
    db: Database,
    config: SettingsWatcherConfig,
    selector: Arc<DynamicSelector>,
    settings_tx: watch::Sender<RotationSettings>,
}

impl SettingsWatcher {
    pub fn new(
        db: Database,
        config: SettingsWatcherConfig,
        selector: Arc<DynamicSelector>,
        settings_tx: watch::Sender<RotationSettings>,
    ) -> Self {
        Self {
            db,
            config,
            selector,
            settings_tx,
        }
    }

    /// Run the watcher (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting settings watcher with {}s poll interval",
            self.config.poll_interval.as_secs()
        );

        let mut poll = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Settings poll failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Settings watcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Read the settings row and apply a change if there is one
    async fn poll_once(&self) -> Result<()> {
        let repo = SettingsRepository::new(self.db.pool().clone());
        let mut incoming = repo.get_rotation().await?;
        incoming.canonicalize();

        let current = self.settings_tx.borrow().clone();
        if incoming == current {
            return Ok(());
        }

        // An invalid write never replaces the running selector
        if let Err(e) = incoming.validate() {
            warn!(error = %e, "Ignoring invalid rotation settings");
            return Ok(());
        }

        if current.selector_changed(&incoming) {
            let log_repo = RequestLogRepository::new(self.db.pool().clone());
            let selector = build_selector(&incoming, log_repo)?;
            self.selector.install(selector).await?;
            info!(method = %incoming.method, "Rotation selector swapped");
        } else {
            info!("Rotation settings updated without a selector swap");
        }

        let _ = self.settings_tx.send(incoming);
        Ok(())
    }
}

/// Handle for managing the settings watcher lifecycle
pub struct SettingsWatcherHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SettingsWatcherHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for SettingsWatcherHandle {
    fn default() -> Self {
        Self::new().0
    }
}
