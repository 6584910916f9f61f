//! Bounded in-process tier.
//!
//! Usage is tracked in bytes reported by [`Sizeable::cache_size`]. Overflow
//! evicts least-recently-accessed records down to the preferred watermark,
//! so a burst of inserts pays for one sort instead of one per insert.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    config::MemoryLimits,
    key::CacheKey,
    units::ByteSize,
    value::Sizeable,
};

#[derive(Debug)]
struct MemoryRecord<V> {
    value: V,
    size: u64,
    last_access: u64,
}

#[derive(Debug)]
struct MemoryState<V> {
    records: HashMap<CacheKey, MemoryRecord<V>>,
    current_usage: u64,
    // Strictly increasing; two accesses never share a stamp.
    access_clock: u64,
}

impl<V> MemoryState<V> {
    fn tick(&mut self) -> u64 {
        self.access_clock += 1;
        self.access_clock
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub purges: u64,
    pub purged_entries: u64,
    pub purged_bytes: u64,
}

#[derive(Debug, Default)]
struct MemoryStoreStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    purges: AtomicU64,
    purged_entries: AtomicU64,
    purged_bytes: AtomicU64,
}

impl MemoryStoreStats {
    fn on_purge(&self, entries: u64, bytes: u64) {
        self.purges.fetch_add(1, Ordering::Relaxed);
        self.purged_entries.fetch_add(entries, Ordering::Relaxed);
        self.purged_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MemoryStoreStatsSnapshot {
        MemoryStoreStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
            purged_entries: self.purged_entries.load(Ordering::Relaxed),
            purged_bytes: self.purged_bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct MemoryStore<V> {
    limits: MemoryLimits,
    state: Mutex<MemoryState<V>>,
    stats: MemoryStoreStats,
}

impl<V> MemoryStore<V>
where
    V: Sizeable + Clone,
{
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(MemoryState {
                records: HashMap::new(),
                current_usage: 0,
                access_clock: 0,
            }),
            stats: MemoryStoreStats::default(),
        }
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    pub fn add(&self, value: V, key: CacheKey) {
        let size = value.cache_size() as u64;
        let mut state = self.state.lock();
        let stamp = state.tick();

        if let Some(previous) = state.records.insert(
            key,
            MemoryRecord {
                value,
                size,
                last_access: stamp,
            },
        ) {
            state.current_usage = state.current_usage.saturating_sub(previous.size);
        }
        state.current_usage = state.current_usage.saturating_add(size);
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);

        if state.current_usage > self.limits.capacity().as_bytes() {
            self.purge_to_preferred(&mut state);
        }
    }

    pub fn value(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.state.lock();
        let stamp = state.tick();
        match state.records.get_mut(key) {
            Some(record) => {
                record.last_access = stamp;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(record.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().records.contains_key(key)
    }

    pub fn remove_value(&self, key: &CacheKey) -> Option<V> {
        let mut state = self.state.lock();
        let record = state.records.remove(key)?;
        state.current_usage = state.current_usage.saturating_sub(record.size);
        Some(record.value)
    }

    /// Drops every record. Returns whether anything was held.
    pub fn remove_all(&self) -> bool {
        let mut state = self.state.lock();
        let had_records = !state.records.is_empty();
        state.records.clear();
        state.records.shrink_to_fit();
        state.current_usage = 0;
        had_records
    }

    pub fn current_usage(&self) -> ByteSize {
        ByteSize::from_bytes(self.state.lock().current_usage)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    pub fn stats(&self) -> MemoryStoreStatsSnapshot {
        self.stats.snapshot()
    }

    fn purge_to_preferred(&self, state: &mut MemoryState<V>) {
        let target = self.limits.preferred_after_purge().as_bytes();

        let mut candidates: Vec<(u64, CacheKey)> = state
            .records
            .iter()
            .map(|(key, record)| (record.last_access, key.clone()))
            .collect();
        candidates.sort_unstable_by_key(|(stamp, _)| *stamp);

        let mut removed = 0u64;
        let mut freed = 0u64;
        for (_, key) in candidates {
            if state.current_usage <= target {
                break;
            }
            if let Some(record) = state.records.remove(&key) {
                state.current_usage =
                    state.current_usage.saturating_sub(record.size);
                freed = freed.saturating_add(record.size);
                removed += 1;
            }
        }

        self.stats.on_purge(removed, freed);
        debug!(
            "memory cache purge: evicted {} entries ({}) => {} / {}",
            removed,
            ByteSize::from_bytes(freed),
            ByteSize::from_bytes(state.current_usage),
            self.limits.capacity(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::{config::MemoryLimits, key::CacheKey, units::ByteSize, value::Sizeable};

    #[derive(Debug, Clone, PartialEq)]
    struct Cost(usize);

    impl Sizeable for Cost {
        fn cache_size(&self) -> usize {
            self.0
        }
    }

    fn store(capacity: u64, preferred: u64) -> MemoryStore<Cost> {
        MemoryStore::new(
            MemoryLimits::new(
                ByteSize::from_bytes(capacity),
                ByteSize::from_bytes(preferred),
            )
            .unwrap(),
        )
    }

    #[test]
    fn overflow_purges_oldest_down_to_preferred() {
        let cache = store(8, 6);
        for i in 0..8 {
            cache.add(Cost(1), CacheKey::new(i.to_string()));
        }
        assert_eq!(cache.current_usage().as_bytes(), 8);
        assert_eq!(cache.len(), 8);

        cache.add(Cost(1), CacheKey::new("8"));

        assert_eq!(cache.current_usage().as_bytes(), 6);
        for gone in ["0", "1", "2"] {
            assert!(!cache.contains(&CacheKey::new(gone)), "{gone} should be purged");
        }
        for kept in ["3", "4", "5", "6", "7", "8"] {
            assert!(cache.contains(&CacheKey::new(kept)), "{kept} should survive");
        }
        assert_eq!(cache.value(&CacheKey::new("0")), None);
        assert_eq!(cache.value(&CacheKey::new("1")), None);
        assert_eq!(cache.value(&CacheKey::new("8")), Some(Cost(1)));

        let stats = cache.stats();
        assert_eq!(stats.purges, 1);
        assert_eq!(stats.purged_entries, 3);
    }

    #[test]
    fn reading_a_record_protects_it_from_purge() {
        let cache = store(4, 2);
        for key in ["a", "b", "c", "d"] {
            cache.add(Cost(1), CacheKey::new(key));
        }
        assert!(cache.value(&CacheKey::new("a")).is_some());

        cache.add(Cost(1), CacheKey::new("e"));

        assert!(cache.contains(&CacheKey::new("a")));
        assert!(cache.contains(&CacheKey::new("e")));
        assert!(!cache.contains(&CacheKey::new("b")));
        assert_eq!(cache.current_usage().as_bytes(), 2);
    }

    #[test]
    fn replacing_a_key_keeps_usage_exact() {
        let cache = store(100, 50);
        let key = CacheKey::new("poster");
        cache.add(Cost(10), key.clone());
        cache.add(Cost(4), key.clone());
        assert_eq!(cache.current_usage().as_bytes(), 4);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.remove_value(&key), Some(Cost(4)));
        assert_eq!(cache.current_usage().as_bytes(), 0);
        assert_eq!(cache.remove_value(&key), None);
    }

    #[test]
    fn usage_matches_sum_of_retained_sizes() {
        let cache = store(64, 40);
        let mut seed = 7u64;
        for i in 0..500u64 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let size = (seed >> 59) as usize + 1;
            cache.add(Cost(size), CacheKey::new((i % 37).to_string()));

            let state = cache.state.lock();
            let sum: u64 = state.records.values().map(|r| r.size).sum();
            assert_eq!(state.current_usage, sum);
            assert!(state.current_usage <= 64);
        }
    }

    #[test]
    fn remove_all_reports_whether_anything_was_held() {
        let cache = store(10, 5);
        assert!(!cache.remove_all());
        cache.add(Cost(3), CacheKey::new("x"));
        assert!(cache.remove_all());
        assert!(cache.is_empty());
        assert_eq!(cache.current_usage(), ByteSize::ZERO);
    }
}
