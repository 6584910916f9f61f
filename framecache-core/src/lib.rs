//! # Framecache Core
//!
//! A two-tier cache for media payloads (encoded image bytes, decoded
//! pixels, video preview frames) with a request coordinator that
//! turns concurrent misses for one key into a single fetch.
//!
//! ## Overview
//!
//! - **Memory tier**: byte-budgeted, purges least-recently-used records down
//!   to a preferred watermark once capacity is exceeded
//! - **Disk tier**: one file per key plus a small side-car with access and
//!   expiration times; expired entries are swept on demand and the store is
//!   trimmed to half its limit once the limit is reached
//! - **Coordinator**: per-key `Idle -> Loading -> Loaded | Failed` with
//!   progress broadcast, write-through on success and per-waiter
//!   cancellation
//! - **Host hooks**: memory pressure and backgrounding signals drive all
//!   maintenance; nothing runs on an internal timer
//!
//! ## Architecture
//!
//! - [`cache`]: [`MemoryStore`], [`DiskStore`] and the [`UnifiedCache`] facade
//! - [`fetch`]: the [`Fetcher`] contract and the [`RequestCoordinator`]
//! - [`loader`]: [`MediaLoader`], the memory -> disk -> fetch front door
//! - [`lifecycle`]: [`HostEvent`] handling
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framecache_core::{
//!     CacheError, CacheKey, ContentMode, FetchContext, MediaLoader, StoreConfig,
//!     Tiers, UnifiedCache, fetcher_fn,
//! };
//!
//! async fn poster(dir: &std::path::Path) -> Result<Vec<u8>, Arc<CacheError>> {
//!     let cache = Arc::new(UnifiedCache::new("posters", StoreConfig::default(), Some(dir)));
//!     let loader = MediaLoader::new(cache, Tiers::ALL);
//!     let key = CacheKey::for_variant("movie-42", 185, 278, ContentMode::Fit);
//!     loader
//!         .load_and_wait(
//!             key,
//!             fetcher_fn(|ctx: FetchContext| async move {
//!                 ctx.report_progress(0.5);
//!                 Ok::<_, CacheError>(b"...".to_vec())
//!             }),
//!         )
//!         .await
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod key;
pub mod lifecycle;
pub mod loader;
pub mod payload;
pub mod time;
pub mod units;
pub mod value;

pub use cache::{
    DiskStore, DiskStoreStatsSnapshot, MemoryStore, MemoryStoreStatsSnapshot,
    Tiers, UnifiedCache, UnifiedCacheStats,
};
pub use config::{DiskLimits, ExpirationPolicy, MemoryLimits, StoreConfig};
pub use error::{CacheError, Result};
pub use fetch::{
    CancelOutcome, CoordinatorStatsSnapshot, DecodeImage, FetchContext,
    FetchStatus, Fetcher, KeyState, ProgressReporter, RequestCoordinator,
    Subscription, WaiterId, fetcher_fn,
};
pub use key::{CacheKey, ContentMode};
pub use lifecycle::{HostEvent, MaintenanceReport, spawn_host_event_listener};
pub use loader::{LoadOutcome, MediaLoader};
pub use payload::{DecodedImage, PreviewFrame, TargetSize};
pub use units::ByteSize;
pub use value::{CacheCodec, CacheValue, Sizeable};
