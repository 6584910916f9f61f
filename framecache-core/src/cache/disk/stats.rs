use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskStoreStatsSnapshot {
    pub reads: u64,
    pub hits: u64,
    pub expired_reads: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub sweeps: u64,
    pub swept_entries: u64,
    pub trims: u64,
    pub trimmed_entries: u64,
    pub trimmed_bytes: u64,
    pub last_maintenance_duration_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DiskStoreStats {
    reads: AtomicU64,
    hits: AtomicU64,
    expired_reads: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    sweeps: AtomicU64,
    swept_entries: AtomicU64,
    trims: AtomicU64,
    trimmed_entries: AtomicU64,
    trimmed_bytes: AtomicU64,
    last_maintenance_duration_ms: AtomicU64,
}

impl DiskStoreStats {
    pub fn on_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_expired_read(&self) {
        self.expired_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write_ok(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write_err(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_sweep_finished(&self, removed: u64, duration_ms: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.swept_entries.fetch_add(removed, Ordering::Relaxed);
        self.last_maintenance_duration_ms
            .store(duration_ms, Ordering::Relaxed);
    }

    pub fn on_trim_finished(&self, removed: u64, bytes: u64, duration_ms: u64) {
        self.trims.fetch_add(1, Ordering::Relaxed);
        self.trimmed_entries.fetch_add(removed, Ordering::Relaxed);
        self.trimmed_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.last_maintenance_duration_ms
            .store(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiskStoreStatsSnapshot {
        DiskStoreStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            expired_reads: self.expired_reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            swept_entries: self.swept_entries.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            trimmed_entries: self.trimmed_entries.load(Ordering::Relaxed),
            trimmed_bytes: self.trimmed_bytes.load(Ordering::Relaxed),
            last_maintenance_duration_ms: self
                .last_maintenance_duration_ms
                .load(Ordering::Relaxed),
        }
    }
}
