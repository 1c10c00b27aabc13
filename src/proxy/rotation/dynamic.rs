//! Runtime-swappable selector holder

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::ProxySelector;
use crate::error::Result;
use crate::models::{Proxy, RotationMethod};

/// Holds the active selector behind an atomic pointer swap.
///
/// Dispatches snapshot the inner selector once via `current()` and keep using
/// it for their whole retry loop, so an in-flight dispatch never observes a
/// settings swap. Readers never hold a lock across an await.
pub struct DynamicSelector {
    inner: RwLock<Arc<dyn ProxySelector>>,
    proxies: RwLock<Vec<Proxy>>,
}

impl DynamicSelector {
    pub fn new(initial: Arc<dyn ProxySelector>) -> Self {
        Self {
            inner: RwLock::new(initial),
            proxies: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of the active selector for one dispatch
    pub fn current(&self) -> Arc<dyn ProxySelector> {
        self.inner.read().clone()
    }

    /// Swap in a new selector, carrying over the latest proxy list.
    /// The swap happens only after the new selector is fully initialized.
    pub async fn install(&self, selector: Arc<dyn ProxySelector>) -> Result<()> {
        let proxies = self.proxies.read().clone();
        selector.refresh(proxies).await?;

        *self.inner.write() = selector;
        Ok(())
    }
}

#[async_trait]
impl ProxySelector for DynamicSelector {
    async fn select(&self, excluded: &HashSet<i32>) -> Result<Arc<Proxy>> {
        let selector = self.current();
        selector.select(excluded).await
    }

    async fn refresh(&self, proxies: Vec<Proxy>) -> Result<()> {
        *self.proxies.write() = proxies.clone();
        let selector = self.current();
        selector.refresh(proxies).await
    }

    fn note_success(&self, proxy_id: i32) {
        self.current().note_success(proxy_id);
    }

    fn available_count(&self) -> usize {
        self.current().available_count()
    }

    fn method(&self) -> RotationMethod {
        self.current().method()
    }
}
