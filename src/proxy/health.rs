//! Health probing for demoted upstreams
//!
//! Active proxies are left alone: the dispatcher is the primary health
//! signal, and probing healthy upstreams would add synthetic load against
//! third-party endpoints. Unhealthy proxies are probed on an interval and
//! restored after three consecutive successful probes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Proxy, ProxyStatus};
use crate::proxy::rotation::{DynamicSelector, ProxySelector};
use crate::proxy::transport::ProxyTransport;
use crate::repository::ProxyRepository;

/// Health prober configuration
#[derive(Clone)]
pub struct HealthProberConfig {
    /// Interval between probe rounds
    pub probe_interval: Duration,
    /// Timeout for each probe
    pub probe_timeout: Duration,
    /// Known reachable target the probe HEADs through the proxy
    pub probe_host: String,
    pub probe_port: u16,
    /// Consecutive successes required to restore an upstream
    pub restore_threshold: u32,
    /// Concurrent probes per round
    pub workers: usize,
}

impl Default for HealthProberConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            probe_host: "www.google.com".to_string(),
            probe_port: 80,
            restore_threshold: 3,
            workers: 8,
        }
    }
}

/// Periodic prober for unhealthy upstreams
pub struct HealthProber {
    db: Database,
    config: HealthProberConfig,
    selector: Arc<DynamicSelector>,
    /// Consecutive probe successes per demoted upstream
    streaks: DashMap<i32, u32>,
}

impl HealthProber {
    pub fn new(db: Database, config: HealthProberConfig, selector: Arc<DynamicSelector>) -> Self {
        Self {
            db,
            config,
            selector,
            streaks: DashMap::new(),
        }
    }

    /// Run the prober (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health prober with {}s interval",
            self.config.probe_interval.as_secs()
        );

        let mut probe_interval = interval(self.config.probe_interval);

        loop {
            tokio::select! {
                _ = probe_interval.tick() => {
                    if let Err(e) = self.probe_round().await {
                        error!("Probe round failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health prober shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe every unhealthy upstream once
    async fn probe_round(&self) -> Result<()> {
        let repo = ProxyRepository::new(self.db.pool().clone());
        let unhealthy = repo.list_by_status(ProxyStatus::Unhealthy).await?;

        // Forget streaks for upstreams no longer demoted
        self.streaks
            .retain(|id, _| unhealthy.iter().any(|p| p.id == *id));

        if unhealthy.is_empty() {
            return Ok(());
        }

        debug!("Probing {} unhealthy proxies", unhealthy.len());

        let results = futures::stream::iter(unhealthy)
            .map(|proxy| async move {
                let ok = self.probe(&proxy).await;
                (proxy, ok)
            })
            .buffer_unordered(self.config.workers)
            .collect::<Vec<(Proxy, bool)>>()
            .await;

        let mut restored = 0usize;
        for (proxy, ok) in results {
            if register_probe(&self.streaks, proxy.id, ok, self.config.restore_threshold) {
                info!(
                    proxy = %proxy.address,
                    "Proxy recovered after {} consecutive probes",
                    self.config.restore_threshold
                );
                if let Err(e) = repo.set_status(proxy.id, ProxyStatus::Active).await {
                    warn!(proxy = %proxy.address, error = %e, "Failed to restore proxy");
                } else {
                    restored += 1;
                }
            }
        }

        if restored > 0 {
            let proxies = repo.list_active().await?;
            if let Err(e) = self.selector.refresh(proxies).await {
                error!("Failed to refresh selector: {}", e);
            }
        }

        Ok(())
    }

    /// One lightweight HEAD through the proxy to the known target
    #[instrument(skip(self, proxy), fields(proxy_id = proxy.id, proxy_address = %proxy.address))]
    async fn probe(&self, proxy: &Proxy) -> bool {
        let connect = timeout(
            self.config.probe_timeout,
            ProxyTransport::connect(proxy, &self.config.probe_host, self.config.probe_port),
        )
        .await;

        let mut stream = match connect {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                debug!("Probe connect failed: {}", e);
                return false;
            }
            Err(_) => {
                debug!("Probe connect timed out");
                return false;
            }
        };

        let request = format!(
            "HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.config.probe_host
        );

        if let Err(e) = stream.write_all(request.as_bytes()).await {
            debug!("Probe write failed: {}", e);
            return false;
        }

        let mut response = vec![0u8; 1024];
        match timeout(self.config.probe_timeout, stream.read(&mut response)).await {
            Ok(Ok(n)) if n > 0 => {
                let head = String::from_utf8_lossy(&response[..n]);
                if head.starts_with("HTTP/") {
                    debug!("Probe succeeded");
                    true
                } else {
                    debug!("Probe returned a non-HTTP response");
                    false
                }
            }
            Ok(Ok(_)) => {
                debug!("Probe returned an empty response");
                false
            }
            Ok(Err(e)) => {
                debug!("Probe read failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Probe read timed out");
                false
            }
        }
    }
}

/// Track one probe outcome. Returns true when the streak reaches the
/// restore threshold; a failure resets the streak to zero.
fn register_probe(streaks: &DashMap<i32, u32>, proxy_id: i32, ok: bool, threshold: u32) -> bool {
    if !ok {
        streaks.insert(proxy_id, 0);
        return false;
    }

    let mut streak = streaks.entry(proxy_id).or_insert(0);
    *streak += 1;

    if *streak >= threshold {
        drop(streak);
        streaks.remove(&proxy_id);
        true
    } else {
        false
    }
}

/// Guard for managing the prober lifecycle
pub struct HealthProberHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthProberHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthProberHandle {
    fn default() -> Self {
        Self::new().0
    }
}
