//! Configuration loading for framecache stores.
//!
//! A [`CacheConfig`] is read from a TOML or JSON file (or inline JSON in the
//! environment), adjusted by individual `FRAMECACHE_*` overrides and then
//! validated into the core [`framecache_core::StoreConfig`].

pub mod error;
pub mod models;
pub mod paths;

pub use error::ConfigLoadError;
pub use models::cache::{
    CacheConfig, ConfigSource, DiskSection, ExpirationSetting, MemorySection,
    parse_byte_size,
};
pub use paths::default_cache_root;
