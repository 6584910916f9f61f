use std::fmt;

/// A strongly-typed byte size.
///
/// This is intentionally base-2 (KiB, MiB, GiB) because that's how we reason
/// about memory and most OS-level tools report it.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const ZERO: Self = Self(0);
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * 1024 * 1024;

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_usize(bytes: usize) -> Self {
        Self(u64::try_from(bytes).unwrap_or(u64::MAX))
    }

    pub const fn from_kib(kib: u64) -> Self {
        Self(kib.saturating_mul(Self::KIB))
    }

    pub const fn from_mib(mib: u64) -> Self {
        Self(mib.saturating_mul(Self::MIB))
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self(gib.saturating_mul(Self::GIB))
    }

    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    pub fn as_mib(self) -> f64 {
        self.0 as f64 / Self::MIB as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub const fn half(self) -> Self {
        Self(self.0 / 2)
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0 as f64;
        if self.0 >= Self::GIB {
            write!(f, "{:.2} GiB", bytes / Self::GIB as f64)
        } else if self.0 >= Self::MIB {
            write!(f, "{:.1} MiB", bytes / Self::MIB as f64)
        } else if self.0 >= Self::KIB {
            write!(f, "{:.1} KiB", bytes / Self::KIB as f64)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ByteSize;

    #[test]
    fn display_picks_largest_unit() {
        assert_eq!(ByteSize::from_bytes(512).to_string(), "512 B");
        assert_eq!(ByteSize::from_kib(2).to_string(), "2.0 KiB");
        assert_eq!(ByteSize::from_mib(3).to_string(), "3.0 MiB");
        assert_eq!(ByteSize::from_gib(1).to_string(), "1.00 GiB");
    }

    #[test]
    fn arithmetic_saturates() {
        let max = ByteSize::from_bytes(u64::MAX);
        assert_eq!(max.saturating_add(ByteSize::from_bytes(1)), max);
        assert_eq!(
            ByteSize::ZERO.saturating_sub(ByteSize::from_bytes(1)),
            ByteSize::ZERO
        );
        assert_eq!(ByteSize::from_bytes(9).half(), ByteSize::from_bytes(4));
    }
}
