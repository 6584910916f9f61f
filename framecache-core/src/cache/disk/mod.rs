//! Persistent tier: one directory per named store.
//!
//! Each entry is a payload file named by the key's hex token plus a
//! `<token>.meta` side-car carrying the key, last access and expiration.
//! Expired entries stay on disk until [`DiskStore::remove_expired_values`]
//! runs; reads only refuse to serve them.

mod eviction;
mod sidecar;
mod stats;

pub use stats::DiskStoreStatsSnapshot;

use std::{
    collections::HashMap,
    fmt,
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
    time::{Instant, SystemTime},
};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::DiskLimits,
    error::{CacheError, Result},
    key::CacheKey,
    time::unix_ms,
    units::ByteSize,
    value::CacheCodec,
};
use eviction::{
    EvictionPlan, EvictionReason, PlannedEviction, ScannedEntry, plan_expired,
    plan_half_size, total_payload_bytes,
};
use sidecar::{EntryMeta, SIDECAR_EXTENSION, TEMP_MARKER, sidecar_name};
use stats::DiskStoreStats;

pub struct DiskStore<V> {
    name: String,
    dir: PathBuf,
    limits: RwLock<DiskLimits>,
    io_lock: Mutex<()>,
    stats: DiskStoreStats,
    _value: PhantomData<fn() -> V>,
}

impl<V> fmt::Debug for DiskStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStore")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("limits", &*self.limits.read())
            .finish()
    }
}

impl<V> DiskStore<V>
where
    V: CacheCodec,
{
    /// Entries live under `root/<name>`. Nothing touches the filesystem until
    /// the first operation.
    pub fn new(root: impl AsRef<Path>, name: &str, limits: DiskLimits) -> Self {
        Self {
            name: name.to_string(),
            dir: root.as_ref().join(name),
            limits: RwLock::new(limits),
            io_lock: Mutex::new(()),
            stats: DiskStoreStats::default(),
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this store's files.
    pub fn root(&self) -> &Path {
        &self.dir
    }

    pub fn limits(&self) -> DiskLimits {
        *self.limits.read()
    }

    /// New limits apply to the next write or maintenance pass.
    pub fn set_limits(&self, limits: DiskLimits) {
        *self.limits.write() = limits;
    }

    pub fn stats(&self) -> DiskStoreStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn store(
        &self,
        value: &V,
        key: &CacheKey,
        reference: SystemTime,
    ) -> Result<()> {
        let bytes = value.encode().inspect_err(|_| self.stats.on_write_err())?;

        let _guard = self.io_lock.lock().await;
        let result = self.store_locked(&bytes, key, reference).await;
        match &result {
            Ok(()) => {
                self.stats.on_write_ok();
                debug!(
                    "disk cache [{}] stored {} ({})",
                    self.name,
                    key,
                    ByteSize::from_usize(bytes.len())
                );
            }
            Err(err) => {
                self.stats.on_write_err();
                debug!("disk cache [{}] write failed; key={}, err={}", self.name, key, err);
            }
        }
        result
    }

    async fn store_locked(
        &self,
        bytes: &[u8],
        key: &CacheKey,
        reference: SystemTime,
    ) -> Result<()> {
        self.ensure_dir().await?;

        let token = key.file_token();
        let payload_path = self.dir.join(&token);
        sidecar::write_replace(&self.dir, &token, &payload_path, bytes).await?;

        let meta = self.meta_for(key.clone(), reference);
        let meta_path = self.dir.join(sidecar_name(&token));
        if let Err(err) =
            sidecar::write_replace(&self.dir, &token, &meta_path, &meta.encode())
                .await
        {
            if let Err(remove_err) = tokio::fs::remove_file(&payload_path).await
                && remove_err.kind() != ErrorKind::NotFound
            {
                warn!(
                    "disk cache [{}] failed to drop payload after side-car error; path={}, err={}",
                    self.name,
                    payload_path.display(),
                    remove_err
                );
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// `Ok(None)` when the entry is absent, incomplete, or expired at
    /// `reference`. Expired files are left for the next sweep.
    pub async fn value(
        &self,
        key: &CacheKey,
        reference: SystemTime,
    ) -> Result<Option<V>> {
        let _guard = self.io_lock.lock().await;
        self.stats.on_read();

        let token = key.file_token();
        let meta_path = self.dir.join(sidecar_name(&token));
        let Some(meta) = sidecar::read(&meta_path).await? else {
            return Ok(None);
        };
        if meta.key != *key {
            debug!(
                "disk cache [{}] token collision; wanted={}, found={}",
                self.name, key, meta.key
            );
            return Ok(None);
        }
        if meta.is_expired(unix_ms(reference)) {
            self.stats.on_expired_read();
            return Ok(None);
        }

        let bytes = match tokio::fs::read(self.dir.join(&token)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = V::decode(&bytes)?;

        let refreshed = self.meta_for(meta.key, reference);
        if let Err(err) =
            sidecar::write_replace(&self.dir, &token, &meta_path, &refreshed.encode())
                .await
        {
            debug!(
                "disk cache [{}] access refresh failed; key={}, err={}",
                self.name, key, err
            );
        }

        self.stats.on_hit();
        Ok(Some(value))
    }

    /// Returns whether a payload was present.
    pub async fn remove_value(&self, key: &CacheKey) -> Result<bool> {
        let _guard = self.io_lock.lock().await;
        let dir = self.dir.clone();
        let token = key.file_token();
        run_blocking(move || remove_entry_sync(&dir, &token).map_err(Into::into))
            .await
    }

    /// Deletes every entry expired at `reference` along with half-written
    /// entries. Returns the keys of the expired entries.
    pub async fn remove_expired_values(
        &self,
        reference: SystemTime,
    ) -> Result<Vec<CacheKey>> {
        let _guard = self.io_lock.lock().await;
        let start = Instant::now();
        let reference_ms = unix_ms(reference);
        let dir = self.dir.clone();

        let removed = run_blocking(move || {
            let entries = scan_sync(&dir)?;
            Ok(apply_plan_sync(&dir, plan_expired(entries, reference_ms)))
        })
        .await?;

        let duration_ms = elapsed_ms(start);
        self.stats
            .on_sweep_finished(removed.len() as u64, duration_ms);

        let orphaned = removed
            .iter()
            .filter(|e| e.reason == EvictionReason::Orphaned)
            .count();
        let keys: Vec<CacheKey> =
            removed.into_iter().filter_map(|e| e.key).collect();
        if !keys.is_empty() || orphaned > 0 {
            info!(
                "disk cache [{}] sweep removed {} expired and {} orphaned entries in {}ms",
                self.name,
                keys.len(),
                orphaned,
                duration_ms
            );
        }
        Ok(keys)
    }

    /// Once the payload total reaches the size limit, evicts
    /// least-recently-accessed entries until at most half the limit is used.
    pub async fn remove_values_to_half_size_if_exceeded(
        &self,
    ) -> Result<Vec<CacheKey>> {
        let _guard = self.io_lock.lock().await;
        let start = Instant::now();
        let size_limit = self.limits().size_limit.as_bytes();
        if size_limit == 0 {
            return Ok(Vec::new());
        }
        let dir = self.dir.clone();

        let (after, removed) = run_blocking(move || {
            let entries = scan_sync(&dir)?;
            let plan = plan_half_size(entries, size_limit);
            let after = plan.total_bytes_after;
            Ok((after, apply_plan_sync(&dir, plan)))
        })
        .await?;

        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let freed = removed
            .iter()
            .map(|e| e.payload_bytes)
            .fold(0u64, u64::saturating_add);
        let duration_ms = elapsed_ms(start);
        self.stats
            .on_trim_finished(removed.len() as u64, freed, duration_ms);
        info!(
            "disk cache [{}] trim removed {} entries ({}) => {} / limit {} in {}ms",
            self.name,
            removed.len(),
            ByteSize::from_bytes(freed),
            ByteSize::from_bytes(after),
            ByteSize::from_bytes(size_limit),
            duration_ms
        );
        Ok(removed.into_iter().filter_map(|e| e.key).collect())
    }

    /// Deletes every file in the store. With `keep_directory == false` the
    /// directory goes too and is recreated by the next write.
    pub async fn remove_all(&self, keep_directory: bool) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let dir = self.dir.clone();
        run_blocking(move || {
            let outcome = if keep_directory {
                clear_dir_sync(&dir)
            } else {
                match std::fs::remove_dir_all(&dir) {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                }
            };
            outcome.map_err(Into::into)
        })
        .await?;
        info!("disk cache [{}] cleared", self.name);
        Ok(())
    }

    /// Sum of payload file sizes. Side-cars and temp files are not counted.
    pub async fn total_size(&self) -> Result<ByteSize> {
        let _guard = self.io_lock.lock().await;
        let dir = self.dir.clone();
        let total = run_blocking(move || {
            Ok(total_payload_bytes(&scan_sync(&dir)?))
        })
        .await?;
        Ok(ByteSize::from_bytes(total))
    }

    /// Number of payload files on disk.
    pub async fn entry_count(&self) -> Result<usize> {
        let _guard = self.io_lock.lock().await;
        let dir = self.dir.clone();
        run_blocking(move || {
            Ok(scan_sync(&dir)?
                .iter()
                .filter(|e| e.payload_bytes.is_some())
                .count())
        })
        .await
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|source| {
            CacheError::CacheDirectoryUnavailable {
                path: self.dir.clone(),
                source,
            }
        })
    }

    fn meta_for(&self, key: CacheKey, reference: SystemTime) -> EntryMeta {
        EntryMeta {
            key,
            last_access_ms: unix_ms(reference),
            expires_ms: self.limits().expiration.expiration_ms(reference),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|join| CacheError::Io(std::io::Error::other(join)))?
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

fn scan_sync(dir: &Path) -> Result<Vec<ScannedEntry>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(CacheError::CacheDirectoryUnavailable {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut by_token: HashMap<String, ScannedEntry> = HashMap::new();

    for entry in read_dir {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("disk cache scan entry error; dir={}, err={e}", dir.display());
                continue;
            }
        };
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name.contains(TEMP_MARKER) {
            continue;
        }

        if let Some(token) = name
            .strip_suffix(SIDECAR_EXTENSION)
            .and_then(|rest| rest.strip_suffix('.'))
        {
            if !CacheKey::is_valid_token(token) {
                continue;
            }
            let meta = sidecar::read_sync(&entry.path()).unwrap_or_else(|e| {
                debug!("disk cache unreadable side-car {}: {e}", entry.path().display());
                None
            });
            by_token
                .entry(token.to_string())
                .or_insert_with(|| ScannedEntry::new(token))
                .meta = meta;
        } else if CacheKey::is_valid_token(name) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            by_token
                .entry(name.to_string())
                .or_insert_with(|| ScannedEntry::new(name))
                .payload_bytes = Some(metadata.len());
        }
    }

    Ok(by_token.into_values().collect())
}

/// Removes planned entries, returning the ones actually deleted.
fn apply_plan_sync(dir: &Path, plan: EvictionPlan) -> Vec<PlannedEviction> {
    let mut removed = Vec::with_capacity(plan.planned.len());
    for eviction in plan.planned {
        match remove_entry_sync(dir, &eviction.token) {
            Ok(_) => removed.push(eviction),
            Err(err) => warn!(
                "disk cache eviction failed; token={}, err={}",
                eviction.token, err
            ),
        }
    }
    removed
}

fn remove_entry_sync(dir: &Path, token: &str) -> std::io::Result<bool> {
    let payload_existed = match std::fs::remove_file(dir.join(token)) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    match std::fs::remove_file(dir.join(sidecar_name(token))) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(payload_existed),
    }
}

fn clear_dir_sync(dir: &Path) -> std::io::Result<()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in read_dir {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
