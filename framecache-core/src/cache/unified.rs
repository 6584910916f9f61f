use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::SystemTime,
};

use tracing::{debug, warn};

use super::{
    disk::{DiskStore, DiskStoreStatsSnapshot},
    memory::{MemoryStore, MemoryStoreStatsSnapshot},
};
use crate::{
    config::StoreConfig,
    error::{CacheError, Result},
    key::CacheKey,
    units::ByteSize,
    value::CacheValue,
};

/// Which tiers an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tiers {
    pub memory: bool,
    pub disk: bool,
}

impl Tiers {
    pub const ALL: Self = Self {
        memory: true,
        disk: true,
    };
    pub const MEMORY: Self = Self {
        memory: true,
        disk: false,
    };
    pub const DISK: Self = Self {
        memory: false,
        disk: true,
    };
}

impl Default for Tiers {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnifiedCacheStats {
    pub memory: MemoryStoreStatsSnapshot,
    pub memory_usage: ByteSize,
    pub memory_entries: usize,
    /// `None` when the cache has no disk tier.
    pub disk: Option<DiskStoreStatsSnapshot>,
    pub disk_available: bool,
}

/// Memory tier in front of an optional disk tier.
///
/// When the disk directory cannot be created the disk tier is switched off
/// for the lifetime of the cache and everything keeps working from memory.
#[derive(Debug)]
pub struct UnifiedCache<V> {
    memory: MemoryStore<V>,
    disk: Option<DiskStore<V>>,
    disk_available: AtomicBool,
}

impl<V> UnifiedCache<V>
where
    V: CacheValue,
{
    /// With `disk_root == None` only the memory tier exists.
    pub fn new(
        name: &str,
        config: StoreConfig,
        disk_root: Option<&Path>,
    ) -> Self {
        let disk = disk_root.map(|root| DiskStore::new(root, name, config.disk));
        Self {
            memory: MemoryStore::new(config.memory),
            disk_available: AtomicBool::new(disk.is_some()),
            disk,
        }
    }

    pub fn memory_only(config: StoreConfig) -> Self {
        Self::new("memory", config, None)
    }

    pub fn memory(&self) -> &MemoryStore<V> {
        &self.memory
    }

    /// The disk tier, unless it was never configured or has been disabled.
    pub fn disk(&self) -> Option<&DiskStore<V>> {
        self.disk.as_ref().filter(|_| self.is_disk_available())
    }

    pub fn is_disk_available(&self) -> bool {
        self.disk_available.load(Ordering::Acquire)
    }

    pub async fn store(
        &self,
        value: V,
        key: CacheKey,
        tiers: Tiers,
        reference: SystemTime,
    ) -> Result<()> {
        let disk = if tiers.disk { self.disk() } else { None };

        if let Some(disk) = disk {
            if let Err(err) = disk.store(&value, &key, reference).await
                && !self.disable_disk_if_unavailable(&err)
            {
                if tiers.memory {
                    self.memory.add(value, key);
                }
                return Err(err);
            }
        }

        if tiers.memory {
            self.memory.add(value, key);
        }
        Ok(())
    }

    /// Memory first, then disk. A disk hit is returned as-is and not copied
    /// into memory.
    pub async fn value(&self, key: &CacheKey, tiers: Tiers) -> Option<V> {
        if tiers.memory
            && let Some(value) = self.memory.value(key)
        {
            return Some(value);
        }
        if !tiers.disk {
            return None;
        }
        let disk = self.disk()?;

        match disk.value(key, SystemTime::now()).await {
            Ok(found) => found,
            Err(err @ CacheError::DeserializationFailed(_)) => {
                warn!(
                    "disk cache [{}] dropping undecodable entry; key={}, err={}",
                    disk.name(),
                    key,
                    err
                );
                if let Err(remove_err) = disk.remove_value(key).await {
                    debug!(
                        "disk cache [{}] failed to remove undecodable entry; key={}, err={}",
                        disk.name(),
                        key,
                        remove_err
                    );
                }
                None
            }
            Err(err) => {
                if !self.disable_disk_if_unavailable(&err) {
                    warn!(
                        "disk cache [{}] read failed; key={}, err={}",
                        disk.name(),
                        key,
                        err
                    );
                }
                None
            }
        }
    }

    pub async fn remove_value(&self, key: &CacheKey, tiers: Tiers) -> Result<()> {
        if tiers.memory {
            self.memory.remove_value(key);
        }
        if tiers.disk
            && let Some(disk) = self.disk()
        {
            disk.remove_value(key).await?;
        }
        Ok(())
    }

    pub async fn remove_all(&self, tiers: Tiers) -> Result<()> {
        if tiers.memory {
            self.memory.remove_all();
        }
        if tiers.disk
            && let Some(disk) = self.disk()
        {
            disk.remove_all(true).await?;
        }
        Ok(())
    }

    pub async fn clear_expired_disk_cache(
        &self,
        reference: SystemTime,
    ) -> Result<Vec<CacheKey>> {
        let Some(disk) = self.disk() else {
            return Ok(Vec::new());
        };
        self.guard_disk(disk.remove_expired_values(reference).await)
    }

    pub async fn trim_disk_cache(&self) -> Result<Vec<CacheKey>> {
        let Some(disk) = self.disk() else {
            return Ok(Vec::new());
        };
        self.guard_disk(disk.remove_values_to_half_size_if_exceeded().await)
    }

    /// Payload bytes currently on disk; zero without a usable disk tier.
    pub async fn disk_storage_size(&self) -> Result<ByteSize> {
        let Some(disk) = self.disk() else {
            return Ok(ByteSize::ZERO);
        };
        match disk.total_size().await {
            Err(err) if self.disable_disk_if_unavailable(&err) => Ok(ByteSize::ZERO),
            other => other,
        }
    }

    pub fn stats(&self) -> UnifiedCacheStats {
        UnifiedCacheStats {
            memory: self.memory.stats(),
            memory_usage: self.memory.current_usage(),
            memory_entries: self.memory.len(),
            disk: self.disk.as_ref().map(DiskStore::stats),
            disk_available: self.is_disk_available(),
        }
    }

    fn guard_disk(&self, result: Result<Vec<CacheKey>>) -> Result<Vec<CacheKey>> {
        match result {
            Err(err) if self.disable_disk_if_unavailable(&err) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Returns `true` when `err` switched the disk tier off (or it already
    /// was off for the same reason).
    fn disable_disk_if_unavailable(&self, err: &CacheError) -> bool {
        let CacheError::CacheDirectoryUnavailable { path, source } = err else {
            return false;
        };
        if self.disk_available.swap(false, Ordering::AcqRel) {
            warn!(
                "disk cache disabled, serving from memory only; path={}, err={}",
                path.display(),
                source
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{Tiers, UnifiedCache};
    use crate::{
        config::{DiskLimits, ExpirationPolicy, StoreConfig},
        key::CacheKey,
        payload::DecodedImage,
        units::ByteSize,
    };
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig {
            disk: DiskLimits {
                size_limit: ByteSize::from_kib(64),
                expiration: ExpirationPolicy::Never,
            },
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn disk_hit_is_not_promoted() {
        let dir = tempdir().unwrap();
        let cache: UnifiedCache<Vec<u8>> =
            UnifiedCache::new("images", config(), Some(dir.path()));
        let key = CacheKey::new("backdrop-1280x720-fill");

        cache
            .store(vec![3u8; 10], key.clone(), Tiers::ALL, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(cache.value(&key, Tiers::MEMORY).await, Some(vec![3u8; 10]));

        cache.memory().remove_value(&key);
        assert_eq!(cache.value(&key, Tiers::MEMORY).await, None);
        assert_eq!(cache.value(&key, Tiers::ALL).await, Some(vec![3u8; 10]));
        assert!(!cache.memory().contains(&key));
        assert_eq!(cache.disk_storage_size().await.unwrap().as_bytes(), 10);
    }

    #[tokio::test]
    async fn unavailable_directory_degrades_to_memory() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"in the way").unwrap();
        let cache: UnifiedCache<Vec<u8>> =
            UnifiedCache::new("images", config(), Some(blocker.as_path()));
        assert!(cache.is_disk_available());

        let key = CacheKey::new("k");
        cache
            .store(vec![1u8; 4], key.clone(), Tiers::ALL, SystemTime::now())
            .await
            .unwrap();
        assert!(!cache.is_disk_available());
        assert!(cache.disk().is_none());
        assert_eq!(cache.value(&key, Tiers::ALL).await, Some(vec![1u8; 4]));
        assert_eq!(cache.value(&key, Tiers::DISK).await, None);

        cache
            .store(vec![2u8; 4], CacheKey::new("k2"), Tiers::ALL, SystemTime::now())
            .await
            .unwrap();
        assert!(cache.trim_disk_cache().await.unwrap().is_empty());
        assert_eq!(cache.disk_storage_size().await.unwrap(), ByteSize::ZERO);
        assert!(!cache.stats().disk_available);
    }

    #[tokio::test]
    async fn undecodable_disk_entry_is_a_miss_and_removed() {
        let dir = tempdir().unwrap();
        let cache: UnifiedCache<DecodedImage> =
            UnifiedCache::new("decoded", config(), Some(dir.path()));
        let key = CacheKey::new("still");
        cache
            .store(
                DecodedImage::from_rgba(1, 1, vec![0, 0, 0, 255]),
                key.clone(),
                Tiers::DISK,
                SystemTime::now(),
            )
            .await
            .unwrap();
        let disk = cache.disk().unwrap();
        std::fs::write(disk.root().join(key.file_token()), b"garbage").unwrap();

        assert_eq!(cache.value(&key, Tiers::ALL).await, None);
        assert_eq!(disk.entry_count().await.unwrap(), 0);
        assert!(cache.is_disk_available());
    }

    #[tokio::test]
    async fn remove_all_respects_tiers() {
        let dir = tempdir().unwrap();
        let cache: UnifiedCache<Vec<u8>> =
            UnifiedCache::new("images", config(), Some(dir.path()));
        let key = CacheKey::new("k");
        cache
            .store(vec![9u8; 2], key.clone(), Tiers::ALL, SystemTime::now())
            .await
            .unwrap();

        cache.remove_all(Tiers::MEMORY).await.unwrap();
        assert!(cache.memory().is_empty());
        assert_eq!(cache.value(&key, Tiers::DISK).await, Some(vec![9u8; 2]));

        cache.remove_all(Tiers::DISK).await.unwrap();
        assert_eq!(cache.value(&key, Tiers::ALL).await, None);
    }
}
