//! Capabilities a payload needs before either cache tier will hold it.

use crate::error::Result;

/// Reports how many bytes a value pins while resident in memory.
pub trait Sizeable {
    fn cache_size(&self) -> usize;
}

/// Converts a value to and from the bytes persisted by the disk tier.
pub trait CacheCodec: Sized {
    /// Fails with [`CacheError::SerializationFailed`](crate::CacheError::SerializationFailed).
    fn encode(&self) -> Result<Vec<u8>>;

    /// Fails with [`CacheError::DeserializationFailed`](crate::CacheError::DeserializationFailed).
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// Everything the caches and the request coordinator require of a payload.
pub trait CacheValue:
    Sizeable + CacheCodec + Clone + Send + Sync + 'static
{
}

impl<T> CacheValue for T where
    T: Sizeable + CacheCodec + Clone + Send + Sync + 'static
{
}

impl Sizeable for Vec<u8> {
    fn cache_size(&self) -> usize {
        self.len()
    }
}

impl CacheCodec for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}
