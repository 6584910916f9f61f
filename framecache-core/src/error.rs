use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache directory unavailable: {path:?}")]
    CacheDirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Fetch failed: {0}")]
    UnderlyingFetchFailed(#[source] anyhow::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Wrap a collaborator error as a failed fetch.
    pub fn fetch_failed(err: impl Into<anyhow::Error>) -> Self {
        Self::UnderlyingFetchFailed(err.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
