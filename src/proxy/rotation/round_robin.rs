//! Round-robin proxy selection strategy

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::ProxySelector;
use crate::error::{Result, RotaError};
use crate::models::{Proxy, RotationMethod};

/// Selects proxies in round-robin order.
///
/// Uses an atomic cursor for lock-free index tracking. The cursor survives
/// refreshes modulo the new list length, so an inventory change does not
/// restart the cycle from the first proxy.
pub struct RoundRobinSelector {
    proxies: RwLock<Vec<Arc<Proxy>>>,
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            proxies: RwLock::new(Vec::new()),
            index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxySelector for RoundRobinSelector {
    async fn select(&self, excluded: &HashSet<i32>) -> Result<Arc<Proxy>> {
        let proxies = self.proxies.read();

        let len = proxies.len();
        if len == 0 {
            return Err(RotaError::NoUpstreams);
        }

        // Scan at most one full cycle so an exclusion-heavy dispatch
        // terminates instead of spinning
        for _ in 0..len {
            let idx = self.index.fetch_add(1, Ordering::Relaxed) % len;
            if let Some(proxy) = proxies.get(idx) {
                if !excluded.contains(&proxy.id) {
                    return Ok(proxy.clone());
                }
            }
        }

        Err(RotaError::NoUpstreams)
    }

    async fn refresh(&self, proxies: Vec<Proxy>) -> Result<()> {
        let mut guard = self.proxies.write();
        *guard = proxies.into_iter().map(Arc::new).collect();

        // Preserve the cursor modulo the new length
        let len = guard.len();
        if len > 0 {
            let current = self.index.load(Ordering::Relaxed);
            self.index.store(current % len, Ordering::Relaxed);
        } else {
            self.index.store(0, Ordering::Relaxed);
        }

        Ok(())
    }

    fn available_count(&self) -> usize {
        self.proxies.read().len()
    }

    fn method(&self) -> RotationMethod {
        RotationMethod::RoundRobin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::testing::test_proxy;

    #[tokio::test]
    async fn test_round_robin_empty() {
        let selector = RoundRobinSelector::new();
        let result = selector.select(&HashSet::new()).await;
        assert!(matches!(result, Err(RotaError::NoUpstreams)));
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let selector = RoundRobinSelector::new();
        let proxies = vec![
            test_proxy(1, "127.0.0.1:8081"),
            test_proxy(2, "127.0.0.1:8082"),
            test_proxy(3, "127.0.0.1:8083"),
        ];
        selector.refresh(proxies).await.unwrap();

        let none = HashSet::new();

        // Should cycle through 1, 2, 3, 1, 2, 3...
        assert_eq!(selector.select(&none).await.unwrap().id, 1);
        assert_eq!(selector.select(&none).await.unwrap().id, 2);
        assert_eq!(selector.select(&none).await.unwrap().id, 3);
        assert_eq!(selector.select(&none).await.unwrap().id, 1);
        assert_eq!(selector.select(&none).await.unwrap().id, 2);
        assert_eq!(selector.select(&none).await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_round_robin_skips_excluded() {
        let selector = RoundRobinSelector::new();
        let proxies = vec![
            test_proxy(1, "127.0.0.1:8081"),
            test_proxy(2, "127.0.0.1:8082"),
            test_proxy(3, "127.0.0.1:8083"),
        ];
        selector.refresh(proxies).await.unwrap();

        let excluded: HashSet<i32> = [1, 2].into_iter().collect();
        assert_eq!(selector.select(&excluded).await.unwrap().id, 3);

        let everyone: HashSet<i32> = [1, 2, 3].into_iter().collect();
        assert!(matches!(
            selector.select(&everyone).await,
            Err(RotaError::NoUpstreams)
        ));
    }

    #[tokio::test]
    async fn test_round_robin_refresh_preserves_cursor() {
        let selector = RoundRobinSelector::new();
        let proxies = vec![
            test_proxy(1, "127.0.0.1:8081"),
            test_proxy(2, "127.0.0.1:8082"),
            test_proxy(3, "127.0.0.1:8083"),
        ];
        selector.refresh(proxies.clone()).await.unwrap();

        let none = HashSet::new();

        // Advance the cursor past 1 and 2
        selector.select(&none).await.unwrap();
        selector.select(&none).await.unwrap();

        // A same-length refresh must not restart the cycle
        selector.refresh(proxies).await.unwrap();
        assert_eq!(selector.select(&none).await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_round_robin_refresh_wraps_cursor_on_shrink() {
        let selector = RoundRobinSelector::new();
        selector
            .refresh(vec![
                test_proxy(1, "127.0.0.1:8081"),
                test_proxy(2, "127.0.0.1:8082"),
                test_proxy(3, "127.0.0.1:8083"),
            ])
            .await
            .unwrap();

        let none = HashSet::new();

        // Cursor now sits at 2
        selector.select(&none).await.unwrap();
        selector.select(&none).await.unwrap();

        // Shrink to two entries: cursor 2 wraps to 0
        selector
            .refresh(vec![
                test_proxy(10, "127.0.0.1:8091"),
                test_proxy(20, "127.0.0.1:8092"),
            ])
            .await
            .unwrap();

        assert_eq!(selector.select(&none).await.unwrap().id, 10);
    }
}
