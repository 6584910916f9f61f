//! Host-driven maintenance. The cache has no timers of its own; the embedding
//! application forwards lifecycle signals and the cache reacts.

use std::{sync::Arc, time::SystemTime};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    cache::UnifiedCache,
    error::Result,
    key::CacheKey,
    value::CacheValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    MemoryPressure,
    EnteringBackground,
    Terminating,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// The memory tier held something and was emptied.
    pub memory_cleared: bool,
    pub expired: Vec<CacheKey>,
    pub trimmed: Vec<CacheKey>,
}

impl<V> UnifiedCache<V>
where
    V: CacheValue,
{
    /// Memory pressure empties the memory tier. Backgrounding and
    /// termination sweep expired disk entries, then trim to half the limit.
    pub async fn handle_host_event(
        &self,
        event: HostEvent,
        now: SystemTime,
    ) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        match event {
            HostEvent::MemoryPressure => {
                report.memory_cleared = self.memory().remove_all();
            }
            HostEvent::EnteringBackground | HostEvent::Terminating => {
                report.expired = self.clear_expired_disk_cache(now).await?;
                report.trimmed = self.trim_disk_cache().await?;
            }
        }
        info!(
            "host event {:?}: memory_cleared={}, expired={}, trimmed={}",
            event,
            report.memory_cleared,
            report.expired.len(),
            report.trimmed.len()
        );
        Ok(report)
    }
}

/// Applies every event received on `events` until the channel closes.
pub fn spawn_host_event_listener<V>(
    cache: Arc<UnifiedCache<V>>,
    mut events: mpsc::Receiver<HostEvent>,
) -> JoinHandle<()>
where
    V: CacheValue,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(err) = cache.handle_host_event(event, SystemTime::now()).await {
                warn!("host event {:?} maintenance failed: {}", event, err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{HostEvent, spawn_host_event_listener};
    use crate::{
        cache::{Tiers, UnifiedCache},
        config::{DiskLimits, ExpirationPolicy, StoreConfig},
        key::CacheKey,
        units::ByteSize,
    };
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn memory_pressure_only_touches_memory() {
        let dir = tempdir().unwrap();
        let cache: UnifiedCache<Vec<u8>> =
            UnifiedCache::new("images", StoreConfig::default(), Some(dir.path()));
        cache
            .store(vec![1u8; 4], CacheKey::new("a"), Tiers::ALL, SystemTime::now())
            .await
            .unwrap();

        let report = cache
            .handle_host_event(HostEvent::MemoryPressure, SystemTime::now())
            .await
            .unwrap();
        assert!(report.memory_cleared);
        assert!(cache.memory().is_empty());
        assert_eq!(cache.disk().unwrap().entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn background_sweeps_then_trims() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            disk: DiskLimits {
                size_limit: ByteSize::from_bytes(300),
                expiration: ExpirationPolicy::After(Duration::from_secs(60)),
            },
            ..StoreConfig::default()
        };
        let cache: UnifiedCache<Vec<u8>> =
            UnifiedCache::new("images", config, Some(dir.path()));
        let start = SystemTime::now();
        cache
            .store(vec![0u8; 100], CacheKey::new("stale"), Tiers::DISK, start)
            .await
            .unwrap();
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            cache
                .store(
                    vec![0u8; 100],
                    CacheKey::new(name),
                    Tiers::DISK,
                    start + Duration::from_secs(100 + i as u64),
                )
                .await
                .unwrap();
        }

        let report = cache
            .handle_host_event(HostEvent::EnteringBackground, start + Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(report.expired, vec![CacheKey::new("stale")]);
        let mut trimmed = report.trimmed;
        trimmed.sort();
        assert_eq!(trimmed, vec![CacheKey::new("a"), CacheKey::new("b")]);
        assert_eq!(cache.disk_storage_size().await.unwrap().as_bytes(), 100);
    }

    #[tokio::test]
    async fn listener_runs_until_channel_closes() {
        let cache = Arc::new(UnifiedCache::<Vec<u8>>::memory_only(StoreConfig::default()));
        cache.memory().add(vec![1u8; 4], CacheKey::new("a"));

        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_host_event_listener(Arc::clone(&cache), rx);
        tx.send(HostEvent::MemoryPressure).await.unwrap();
        tx.send(HostEvent::Terminating).await.unwrap();
        drop(tx);

        handle.await.unwrap();
        assert!(cache.memory().is_empty());
    }
}
