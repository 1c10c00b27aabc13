//! Least-connections proxy selection strategy

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use super::ProxySelector;
use crate::error::{Result, RotaError};
use crate::models::{Proxy, RotationMethod};

/// Ranks the pool by lifetime successful requests ascending, ties broken by
/// id.
///
/// The name is historical: this optimizes for cold-start spread rather than
/// live connection count. Counters are read from the proxy list snapshot and
/// catch up on the next refresh.
pub struct LeastConnectionsSelector {
    proxies: RwLock<Vec<Arc<Proxy>>>,
}

impl LeastConnectionsSelector {
    pub fn new() -> Self {
        Self {
            proxies: RwLock::new(Vec::new()),
        }
    }
}

impl Default for LeastConnectionsSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxySelector for LeastConnectionsSelector {
    async fn select(&self, excluded: &HashSet<i32>) -> Result<Arc<Proxy>> {
        let proxies = self.proxies.read();

        if proxies.is_empty() {
            return Err(RotaError::NoUpstreams);
        }

        let mut selected: Option<&Arc<Proxy>> = None;

        for proxy in proxies.iter() {
            if excluded.contains(&proxy.id) {
                continue;
            }

            let better = match selected {
                None => true,
                Some(best) => {
                    (proxy.successful_requests, proxy.id) < (best.successful_requests, best.id)
                }
            };
            if better {
                selected = Some(proxy);
            }
        }

        selected.cloned().ok_or(RotaError::NoUpstreams)
    }

    async fn refresh(&self, proxies: Vec<Proxy>) -> Result<()> {
        let mut guard = self.proxies.write();
        *guard = proxies.into_iter().map(Arc::new).collect();
        Ok(())
    }

    fn available_count(&self) -> usize {
        self.proxies.read().len()
    }

    fn method(&self) -> RotationMethod {
        RotationMethod::LeastConnections
    }
}
