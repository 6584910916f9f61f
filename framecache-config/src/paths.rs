use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::ConfigLoadError;

/// Platform cache directory used when no disk root is configured,
/// e.g. `~/.cache/framecache` on Linux.
pub fn default_cache_root() -> Result<PathBuf, ConfigLoadError> {
    let dirs = ProjectDirs::from("", "framecache", "framecache")
        .ok_or(ConfigLoadError::NoCacheDir)?;
    Ok(dirs.cache_dir().to_path_buf())
}
