//! Random proxy selection strategy

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;

use super::ProxySelector;
use crate::error::{Result, RotaError};
use crate::models::{Proxy, RotationMethod};

/// Selects a uniformly random proxy from the pool minus the exclusions
pub struct RandomSelector {
    proxies: RwLock<Vec<Arc<Proxy>>>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self {
            proxies: RwLock::new(Vec::new()),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxySelector for RandomSelector {
    async fn select(&self, excluded: &HashSet<i32>) -> Result<Arc<Proxy>> {
        let proxies = self.proxies.read();

        if proxies.is_empty() {
            return Err(RotaError::NoUpstreams);
        }

        let candidates: Vec<&Arc<Proxy>> = proxies
            .iter()
            .filter(|p| !excluded.contains(&p.id))
            .collect();

        let mut rng = rand::thread_rng();
        candidates
            .choose(&mut rng)
            .map(|p| Arc::clone(p))
            .ok_or(RotaError::NoUpstreams)
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
        RotationMethod::Random
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::testing::test_proxy;

    #[tokio::test]
    async fn test_random_selector_empty() {
        let selector = RandomSelector::new();
        let result = selector.select(&HashSet::new()).await;
        assert!(matches!(result, Err(RotaError::NoUpstreams)));
    }

    #[tokio::test]
    async fn test_random_selector_single_proxy() {
        let selector = RandomSelector::new();
        selector
            .refresh(vec![test_proxy(1, "127.0.0.1:8081")])
            .await
            .unwrap();

        let selected = selector.select(&HashSet::new()).await.unwrap();
        assert_eq!(selected.id, 1);
    }

    #[tokio::test]
    async fn test_random_selector_respects_exclusions() {
        let selector = RandomSelector::new();
        selector
            .refresh(vec![
                test_proxy(1, "127.0.0.1:8081"),
                test_proxy(2, "127.0.0.1:8082"),
                test_proxy(3, "127.0.0.1:8083"),
            ])
            .await
            .unwrap();

        let excluded: HashSet<i32> = [1, 3].into_iter().collect();
        for _ in 0..10 {
            let selected = selector.select(&excluded).await.unwrap();
            assert_eq!(selected.id, 2);
        }

        let everyone: HashSet<i32> = [1, 2, 3].into_iter().collect();
        assert!(matches!(
            selector.select(&everyone).await,
            Err(RotaError::NoUpstreams)
        ));
    }
}
