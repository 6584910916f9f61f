use std::fmt;

use sha2::{Digest, Sha256};

/// How a source is fitted into the requested target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentMode {
    Fit,
    Fill,
}

impl ContentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Fill => "fill",
        }
    }
}

impl fmt::Display for ContentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable key for one variant of one media source.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build the key for a sized rendition of `source_id`.
    ///
    /// The layout is `"{source}-{width}x{height}-{mode}"` and must stay stable:
    /// disk entries written by earlier runs are located through it.
    pub fn for_variant(
        source_id: &str,
        width: u32,
        height: u32,
        mode: ContentMode,
    ) -> Self {
        let mut key = String::with_capacity(source_id.len() + 24);
        key.push_str(source_id);
        key.push('-');
        key.push_str(&width.to_string());
        key.push('x');
        key.push_str(&height.to_string());
        key.push('-');
        key.push_str(mode.as_str());
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe, fixed-length name for this key (hex SHA-256).
    pub fn file_token(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    pub fn is_valid_token(token: &str) -> bool {
        token.len() == 64
            && token
                .as_bytes()
                .iter()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.0).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}
