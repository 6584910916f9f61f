//! Per-entry metadata stored next to each payload file.
//!
//! Layout (little-endian): magic `FCMETA01`, `u32` version, `u64` last
//! access ms, `u64` expires ms, `u32` key length, key bytes.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use uuid::Uuid;

use crate::key::CacheKey;

pub(crate) const SIDECAR_EXTENSION: &str = "meta";
pub(crate) const TEMP_MARKER: &str = ".tmp-";

const MAGIC: [u8; 8] = *b"FCMETA01";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 8 + 8 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryMeta {
    pub key: CacheKey,
    pub last_access_ms: u64,
    pub expires_ms: u64,
}

impl EntryMeta {
    pub fn is_expired(&self, reference_ms: u64) -> bool {
        self.expires_ms <= reference_ms
    }

    pub fn encode(&self) -> Vec<u8> {
        let key = self.key.as_str().as_bytes();
        let mut out = Vec::with_capacity(HEADER_LEN + key.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.last_access_ms.to_le_bytes());
        out.extend_from_slice(&self.expires_ms.to_le_bytes());
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out
    }

    /// `None` for anything that is not a complete side-car of the current
    /// version.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN || buf[..8] != MAGIC {
            return None;
        }
        let mut cursor = 8usize;
        let version = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().ok()?);
        cursor += 4;
        if version != VERSION {
            return None;
        }
        let last_access_ms =
            u64::from_le_bytes(buf[cursor..cursor + 8].try_into().ok()?);
        cursor += 8;
        let expires_ms =
            u64::from_le_bytes(buf[cursor..cursor + 8].try_into().ok()?);
        cursor += 8;
        let key_len =
            u32::from_le_bytes(buf[cursor..cursor + 4].try_into().ok()?) as usize;
        cursor += 4;
        if buf.len() != cursor + key_len {
            return None;
        }
        let key = std::str::from_utf8(&buf[cursor..]).ok()?;
        Some(Self {
            key: CacheKey::new(key),
            last_access_ms,
            expires_ms,
        })
    }
}

pub(crate) fn sidecar_name(token: &str) -> String {
    format!("{token}.{SIDECAR_EXTENSION}")
}

pub(crate) fn read_sync(path: &Path) -> std::io::Result<Option<EntryMeta>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(EntryMeta::decode(&buf))
}

pub(crate) async fn read(path: &Path) -> std::io::Result<Option<EntryMeta>> {
    match tokio::fs::read(path).await {
        Ok(buf) => Ok(EntryMeta::decode(&buf)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Writes `bytes` to a uniquely named temp file in `dir` and renames it over
/// `dest`.
pub(crate) async fn write_replace(
    dir: &Path,
    token: &str,
    dest: &Path,
    bytes: &[u8],
) -> std::io::Result<()> {
    let tmp = dir.join(format!("{token}{TEMP_MARKER}{}", Uuid::new_v4().simple()));
    let dest = dest.to_path_buf();
    let bytes = bytes.to_vec();
    let result = tokio::task::spawn_blocking(move || {
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        if let Err(err) = std::fs::rename(&tmp, &dest) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(())
    })
    .await;
    match result {
        Ok(inner) => inner,
        Err(join) => Err(std::io::Error::other(join)),
    }
}
