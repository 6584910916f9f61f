pub mod disk;
pub mod memory;
pub mod unified;

pub use disk::{DiskStore, DiskStoreStatsSnapshot};
pub use memory::{MemoryStore, MemoryStoreStatsSnapshot};
pub use unified::{Tiers, UnifiedCache, UnifiedCacheStats};
