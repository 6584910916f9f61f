use anyhow::anyhow;
use framecache_core::{
    ByteSize, DiskLimits, ExpirationPolicy, MemoryLimits, StoreConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Component, Path, PathBuf},
    time::{Duration, SystemTime},
};
use tracing::debug;

use crate::{error::ConfigLoadError, paths::default_cache_root};

pub const CONFIG_PATH_VAR: &str = "FRAMECACHE_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "FRAMECACHE_CONFIG_JSON";
pub const MEMORY_CAPACITY_VAR: &str = "FRAMECACHE_MEMORY_CAPACITY";
pub const MEMORY_PREFERRED_VAR: &str = "FRAMECACHE_MEMORY_PREFERRED";
pub const DISK_ENABLED_VAR: &str = "FRAMECACHE_DISK_ENABLED";
pub const DISK_ROOT_VAR: &str = "FRAMECACHE_DISK_ROOT";
pub const DISK_SIZE_LIMIT_VAR: &str = "FRAMECACHE_DISK_SIZE_LIMIT";
pub const EXPIRATION_VAR: &str = "FRAMECACHE_EXPIRATION";

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
    Explicit(PathBuf),
}

/// Disk expiration as written in config files: `"never"`, a humantime
/// duration such as `"7days"` or an RFC 3339 timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExpirationSetting {
    Never,
    After(Duration),
    At(SystemTime),
}

impl Default for ExpirationSetting {
    fn default() -> Self {
        ExpirationPolicy::default().into()
    }
}

impl std::str::FromStr for ExpirationSetting {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("never") {
            return Ok(Self::Never);
        }
        if let Ok(ttl) = humantime::parse_duration(raw) {
            return Ok(Self::After(ttl));
        }
        humantime::parse_rfc3339_weak(raw).map(Self::At).map_err(|_| {
            format!(
                "'{raw}' is not 'never', a duration (e.g. '7days') or an RFC 3339 timestamp"
            )
        })
    }
}

impl TryFrom<String> for ExpirationSetting {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExpirationSetting> for String {
    fn from(value: ExpirationSetting) -> Self {
        match value {
            ExpirationSetting::Never => "never".to_string(),
            ExpirationSetting::After(ttl) => {
                humantime::format_duration(ttl).to_string()
            }
            ExpirationSetting::At(date) => {
                humantime::format_rfc3339(date).to_string()
            }
        }
    }
}

impl From<ExpirationSetting> for ExpirationPolicy {
    fn from(value: ExpirationSetting) -> Self {
        match value {
            ExpirationSetting::Never => Self::Never,
            ExpirationSetting::After(ttl) => Self::After(ttl),
            ExpirationSetting::At(date) => Self::At(date),
        }
    }
}

impl From<ExpirationPolicy> for ExpirationSetting {
    fn from(value: ExpirationPolicy) -> Self {
        match value {
            ExpirationPolicy::Never => Self::Never,
            ExpirationPolicy::After(ttl) => Self::After(ttl),
            ExpirationPolicy::At(date) => Self::At(date),
        }
    }
}

/// Memory tier budget, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemorySection {
    /// Usage above this triggers a purge.
    pub capacity_bytes: u64,
    /// Usage a purge brings the tier back down to. Must not exceed
    /// `capacity_bytes`.
    pub preferred_after_purge_bytes: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        let limits = MemoryLimits::default();
        Self {
            capacity_bytes: limits.capacity().as_bytes(),
            preferred_after_purge_bytes: limits
                .preferred_after_purge()
                .as_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiskSection {
    /// When false the store runs memory-only.
    pub enabled: bool,
    /// Parent directory for store directories. Falls back to the platform
    /// cache directory.
    pub root: Option<PathBuf>,
    /// Reaching this triggers a trim to half of it. Zero disables trimming.
    pub size_limit_bytes: u64,
    pub expiration: ExpirationSetting,
}

impl Default for DiskSection {
    fn default() -> Self {
        let limits = DiskLimits::default();
        Self {
            enabled: true,
            root: None,
            size_limit_bytes: limits.size_limit.as_bytes(),
            expiration: limits.expiration.into(),
        }
    }
}

/// File-level cache configuration.
///
/// ```toml
/// store_name = "thumbnails"
///
/// [memory]
/// capacity_bytes = 268435456
/// preferred_after_purge_bytes = 201326592
///
/// [disk]
/// root = "/var/cache/framecache"
/// size_limit_bytes = 1073741824
/// expiration = "7days"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory name of the store below the disk root.
    pub store_name: String,
    pub memory: MemorySection,
    pub disk: DiskSection,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_name: "media".to_string(),
            memory: MemorySection::default(),
            disk: DiskSection::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from the process environment, resolving default
    /// files against the current directory.
    pub fn load_from_env() -> Result<(Self, ConfigSource), ConfigLoadError> {
        let base_dir = std::env::current_dir().unwrap_or_default();
        Self::load(|name| std::env::var(name).ok(), &base_dir)
    }

    /// Load configuration using `lookup` for environment variables.
    /// Evaluation order:
    /// 1) `$FRAMECACHE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$FRAMECACHE_CONFIG_JSON` (inline JSON),
    /// 3) the first of `framecache.toml`, `framecache.json`,
    ///    `config/framecache.toml` found under `base_dir`,
    /// 4) defaults.
    ///
    /// Individual `FRAMECACHE_*` overrides are applied on top of whichever
    /// source won.
    pub fn load<F>(
        lookup: F,
        base_dir: &Path,
    ) -> Result<(Self, ConfigSource), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let (mut config, source) = if let Some(path_str) = var(CONFIG_PATH_VAR)
        {
            let path = PathBuf::from(path_str.trim());
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = var(CONFIG_JSON_VAR) {
            let parsed = serde_json::from_str::<Self>(&raw).map_err(|err| {
                ConfigLoadError::Parse(anyhow!(
                    "invalid {CONFIG_JSON_VAR}: {err}"
                ))
            })?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        config.apply_overrides(var)?;
        debug!(?source, store = %config.store_name, "cache config loaded");
        Ok((config, source))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            ConfigLoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|err| {
                ConfigLoadError::Parse(anyhow!(
                    "invalid cache config {}: {err}",
                    path.display()
                ))
            }),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                ConfigLoadError::Parse(anyhow!(
                    "invalid cache config {}: {err}",
                    path.display()
                ))
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parse a config of unknown format: TOML first, then JSON.
    pub fn parse_from_str(
        contents: &str,
        origin: &str,
    ) -> Result<Self, ConfigLoadError> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                ConfigLoadError::Parse(anyhow!(
                    "failed to parse cache config {origin}: toml error: {toml_err}; json error: {json_err}"
                ))
            })
        })
    }

    /// Apply the single-value `FRAMECACHE_*` overrides.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(MEMORY_CAPACITY_VAR) {
            self.memory.capacity_bytes =
                parse_override(MEMORY_CAPACITY_VAR, &raw, parse_byte_size)?
                    .as_bytes();
        }
        if let Some(raw) = lookup(MEMORY_PREFERRED_VAR) {
            self.memory.preferred_after_purge_bytes =
                parse_override(MEMORY_PREFERRED_VAR, &raw, parse_byte_size)?
                    .as_bytes();
        }
        if let Some(raw) = lookup(DISK_ENABLED_VAR) {
            self.disk.enabled =
                parse_override(DISK_ENABLED_VAR, &raw, parse_flag)?;
        }
        if let Some(raw) = lookup(DISK_ROOT_VAR) {
            self.disk.root = Some(PathBuf::from(raw.trim()));
        }
        if let Some(raw) = lookup(DISK_SIZE_LIMIT_VAR) {
            self.disk.size_limit_bytes =
                parse_override(DISK_SIZE_LIMIT_VAR, &raw, parse_byte_size)?
                    .as_bytes();
        }
        if let Some(raw) = lookup(EXPIRATION_VAR) {
            self.disk.expiration =
                parse_override(EXPIRATION_VAR, &raw, str::parse::<ExpirationSetting>)?;
        }
        Ok(())
    }

    /// Validated limits for the core store.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigLoadError> {
        validate_store_name(&self.store_name)?;
        let memory = MemoryLimits::new(
            ByteSize::from_bytes(self.memory.capacity_bytes),
            ByteSize::from_bytes(self.memory.preferred_after_purge_bytes),
        )?;
        Ok(StoreConfig {
            memory,
            disk: DiskLimits {
                size_limit: ByteSize::from_bytes(self.disk.size_limit_bytes),
                expiration: self.disk.expiration.into(),
            },
        })
    }

    /// Parent directory for the disk tier, or `None` when disk is disabled.
    pub fn disk_root(&self) -> Result<Option<PathBuf>, ConfigLoadError> {
        if !self.disk.enabled {
            return Ok(None);
        }
        match &self.disk.root {
            Some(root) => Ok(Some(root.clone())),
            None => default_cache_root().map(Some),
        }
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "framecache.toml",
            "framecache.json",
            "config/framecache.toml",
        ];

        CANDIDATES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.is_file())
    }
}

/// Parse `"1048576"`, `"512KiB"`, `"256 MiB"` or `"1g"` into a byte size.
pub fn parse_byte_size(raw: &str) -> Result<ByteSize, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("'{raw}' does not start with a byte count"))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        other => return Err(format!("unknown size unit '{other}'")),
    };

    value
        .checked_mul(multiplier)
        .map(ByteSize::from_bytes)
        .ok_or_else(|| format!("'{raw}' overflows a 64-bit byte count"))
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn parse_override<T>(
    var: &'static str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigLoadError> {
    parse(raw).map_err(|message| ConfigLoadError::InvalidOverride {
        var,
        message,
    })
}

fn validate_store_name(name: &str) -> Result<(), ConfigLoadError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(ConfigLoadError::InvalidStoreName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn expiration_setting_accepts_all_forms() {
        assert_eq!(
            "never".parse::<ExpirationSetting>().unwrap(),
            ExpirationSetting::Never
        );
        assert_eq!(
            "90s".parse::<ExpirationSetting>().unwrap(),
            ExpirationSetting::After(Duration::from_secs(90))
        );
        assert_eq!(
            "1970-01-01T00:00:10Z".parse::<ExpirationSetting>().unwrap(),
            ExpirationSetting::At(UNIX_EPOCH + Duration::from_secs(10))
        );
        assert!("soon".parse::<ExpirationSetting>().is_err());
    }

    #[test]
    fn expiration_setting_serializes_to_its_string_form() {
        let json =
            serde_json::to_string(&ExpirationSetting::After(Duration::from_secs(120)))
                .unwrap();
        assert_eq!(json, "\"2m\"");
        let back: ExpirationSetting = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExpirationSetting::After(Duration::from_secs(120)));
    }

    #[test]
    fn byte_sizes_with_units() {
        assert_eq!(parse_byte_size("1024").unwrap().as_bytes(), 1024);
        assert_eq!(parse_byte_size("512KiB").unwrap().as_bytes(), 512 * 1024);
        assert_eq!(parse_byte_size("2 MiB").unwrap().as_bytes(), 2 << 20);
        assert_eq!(parse_byte_size("1g").unwrap().as_bytes(), 1 << 30);
        assert!(parse_byte_size("MiB").is_err());
        assert!(parse_byte_size("12 parsecs").is_err());
        assert!(parse_byte_size("18446744073709551615GiB").is_err());
    }

    #[test]
    fn store_name_must_be_one_component() {
        assert!(validate_store_name("thumbnails").is_ok());
        for bad in ["", "..", "a/b", "/abs", "."] {
            assert!(
                matches!(
                    validate_store_name(bad),
                    Err(ConfigLoadError::InvalidStoreName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn defaults_mirror_core_limits() {
        let config = CacheConfig::default();
        assert_eq!(config.store_config().unwrap(), StoreConfig::default());
    }
}
