use std::time::{Duration, SystemTime};

use crate::{
    error::{CacheError, Result},
    time::unix_ms,
    units::ByteSize,
};

/// When a disk entry stops being servable, relative to the time it was last
/// written or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationPolicy {
    Never,
    After(Duration),
    At(SystemTime),
}

impl ExpirationPolicy {
    /// Expiration instant (unix millis) for an entry touched at `reference`.
    pub fn expiration_ms(&self, reference: SystemTime) -> u64 {
        match self {
            Self::Never => u64::MAX,
            Self::After(ttl) => unix_ms(reference).saturating_add(
                ttl.as_millis().min(u128::from(u64::MAX)) as u64,
            ),
            Self::At(date) => unix_ms(*date),
        }
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::After(Duration::from_secs(7 * 24 * 60 * 60))
    }
}

/// Byte budget for the memory tier.
///
/// Once usage rises above `capacity`, least-recently-accessed records are
/// dropped until usage is at or below `preferred_after_purge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    capacity: ByteSize,
    preferred_after_purge: ByteSize,
}

impl MemoryLimits {
    pub fn new(
        capacity: ByteSize,
        preferred_after_purge: ByteSize,
    ) -> Result<Self> {
        if preferred_after_purge > capacity {
            return Err(CacheError::InvalidConfig(format!(
                "preferred usage after purge ({preferred_after_purge}) exceeds memory capacity ({capacity})"
            )));
        }
        Ok(Self {
            capacity,
            preferred_after_purge,
        })
    }

    pub const fn capacity(&self) -> ByteSize {
        self.capacity
    }

    pub const fn preferred_after_purge(&self) -> ByteSize {
        self.preferred_after_purge
    }
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            capacity: ByteSize::from_mib(256),
            preferred_after_purge: ByteSize::from_mib(192),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskLimits {
    /// Zero disables size-based trimming.
    pub size_limit: ByteSize,
    pub expiration: ExpirationPolicy,
}

impl Default for DiskLimits {
    fn default() -> Self {
        Self {
            size_limit: ByteSize::from_gib(1),
            expiration: ExpirationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreConfig {
    pub memory: MemoryLimits,
    pub disk: DiskLimits,
}

#[cfg(test)]
mod tests {
    use super::{ExpirationPolicy, MemoryLimits};
    use crate::{error::CacheError, units::ByteSize};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn preferred_above_capacity_is_rejected() {
        let err = MemoryLimits::new(ByteSize::from_bytes(8), ByteSize::from_bytes(9))
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig(_)));
        assert!(MemoryLimits::new(ByteSize::from_bytes(8), ByteSize::from_bytes(8)).is_ok());
    }

    #[test]
    fn expiration_is_computed_from_reference() {
        let reference = UNIX_EPOCH + Duration::from_secs(10);
        assert_eq!(
            ExpirationPolicy::After(Duration::from_secs(5)).expiration_ms(reference),
            15_000
        );
        assert_eq!(ExpirationPolicy::Never.expiration_ms(reference), u64::MAX);
        let fixed = UNIX_EPOCH + Duration::from_secs(3);
        assert_eq!(ExpirationPolicy::At(fixed).expiration_ms(reference), 3_000);
    }
}
