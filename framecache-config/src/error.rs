use std::path::PathBuf;

use framecache_core::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read cache config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse cache config: {0}")]
    Parse(#[source] anyhow::Error),
    #[error("invalid value for {var}: {message}")]
    InvalidOverride { var: &'static str, message: String },
    #[error("invalid store name '{0}': expected a single path component")]
    InvalidStoreName(String),
    #[error("could not resolve a cache directory for this platform")]
    NoCacheDir,
    #[error(transparent)]
    Limits(#[from] CacheError),
}
