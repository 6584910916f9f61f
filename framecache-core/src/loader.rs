use std::sync::Arc;

use tracing::debug;

use crate::{
    cache::{Tiers, UnifiedCache},
    error::CacheError,
    fetch::{CancelOutcome, Fetcher, RequestCoordinator, Subscription, WaiterId},
    key::CacheKey,
    value::CacheValue,
};

#[derive(Debug)]
pub enum LoadOutcome<V> {
    /// Served from memory, or from disk and then copied into memory.
    Ready(V),
    /// A fetch is running; the subscription delivers progress and the result.
    Pending(Subscription<V>),
}

impl<V> LoadOutcome<V> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Front door for media requests: memory, then disk, then one coalesced
/// fetch per key.
#[derive(Debug)]
pub struct MediaLoader<V> {
    cache: Arc<UnifiedCache<V>>,
    coordinator: RequestCoordinator<V>,
}

impl<V> Clone for MediaLoader<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<V> MediaLoader<V>
where
    V: CacheValue,
{
    /// Fetched values are written to `write_tiers`.
    pub fn new(cache: Arc<UnifiedCache<V>>, write_tiers: Tiers) -> Self {
        let coordinator = RequestCoordinator::new(Arc::clone(&cache), write_tiers);
        Self { cache, coordinator }
    }

    pub fn cache(&self) -> &Arc<UnifiedCache<V>> {
        &self.cache
    }

    pub fn coordinator(&self) -> &RequestCoordinator<V> {
        &self.coordinator
    }

    pub async fn load<F>(&self, key: CacheKey, fetcher: F) -> LoadOutcome<V>
    where
        F: Fetcher<V> + 'static,
    {
        if let Some(value) = self.cache.memory().value(&key) {
            debug!("load hit (memory): key={}", key);
            return LoadOutcome::Ready(value);
        }

        if let Some(value) = self.cache.value(&key, Tiers::DISK).await {
            debug!("load hit (disk), promoting: key={}", key);
            self.cache.memory().add(value.clone(), key);
            return LoadOutcome::Ready(value);
        }

        LoadOutcome::Pending(self.coordinator.request(key, fetcher))
    }

    pub async fn load_and_wait<F>(
        &self,
        key: CacheKey,
        fetcher: F,
    ) -> Result<V, Arc<CacheError>>
    where
        F: Fetcher<V> + 'static,
    {
        match self.load(key, fetcher).await {
            LoadOutcome::Ready(value) => Ok(value),
            LoadOutcome::Pending(subscription) => subscription.wait().await,
        }
    }

    pub fn cancel(&self, key: &CacheKey, waiter: WaiterId) -> CancelOutcome {
        self.coordinator.cancel(key, waiter)
    }
}
