use std::{
    io::{Read, Write},
    path::Path,
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use framecache_config::{CacheConfig, ExpirationSetting};
use framecache_core::{
    CacheKey, DiskStore, HostEvent, Tiers, UnifiedCache,
};
use serde_json::json;

pub type ByteCache = UnifiedCache<Vec<u8>>;

pub fn open_store(config: &CacheConfig) -> Result<ByteCache> {
    let store_config = config.store_config()?;
    let Some(root) = config.disk_root()? else {
        bail!("disk tier is disabled in the cache config; nothing to operate on");
    };
    Ok(UnifiedCache::new(
        &config.store_name,
        store_config,
        Some(&root),
    ))
}

fn disk(cache: &ByteCache) -> Result<&DiskStore<Vec<u8>>> {
    cache
        .disk()
        .context("disk store is unavailable (directory could not be created or read)")
}

pub async fn stat(cache: &ByteCache, as_json: bool) -> Result<()> {
    let disk = disk(cache)?;
    let size = disk.total_size().await?;
    let entries = disk.entry_count().await?;
    let limits = disk.limits();
    let expiration = String::from(ExpirationSetting::from(limits.expiration));

    if as_json {
        let report = json!({
            "store": disk.name(),
            "directory": disk.root().display().to_string(),
            "entries": entries,
            "size_bytes": size.as_bytes(),
            "size_limit_bytes": limits.size_limit.as_bytes(),
            "expiration": expiration,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("store:      {}", disk.name());
        println!("directory:  {}", disk.root().display());
        println!("entries:    {entries}");
        println!("size:       {size} ({} bytes)", size.as_bytes());
        if limits.size_limit.is_zero() {
            println!("size limit: none");
        } else {
            println!("size limit: {}", limits.size_limit);
        }
        println!("expiration: {expiration}");
    }
    Ok(())
}

pub async fn put(cache: &ByteCache, key: String, file: &Path) -> Result<()> {
    let payload = if file == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read payload from stdin")?;
        buf
    } else {
        tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?
    };

    let len = payload.len();
    cache
        .store(payload, CacheKey::new(key.clone()), Tiers::DISK, SystemTime::now())
        .await
        .with_context(|| format!("failed to store '{key}'"))?;
    disk(cache)?;
    eprintln!("stored '{key}' ({len} bytes)");
    Ok(())
}

pub async fn get(
    cache: &ByteCache,
    key: String,
    output: Option<&Path>,
) -> Result<()> {
    disk(cache)?;
    let Some(payload) = cache.value(&CacheKey::new(key.clone()), Tiers::DISK).await
    else {
        bail!("no live entry for '{key}'");
    };

    match output {
        Some(path) => tokio::fs::write(path, &payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&payload)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

pub async fn rm(cache: &ByteCache, key: String) -> Result<()> {
    let removed = disk(cache)?.remove_value(&CacheKey::new(key.clone())).await?;
    if removed {
        eprintln!("removed '{key}'");
    } else {
        eprintln!("no entry for '{key}'");
    }
    Ok(())
}

pub async fn sweep(cache: &ByteCache) -> Result<()> {
    disk(cache)?;
    let removed = cache.clear_expired_disk_cache(SystemTime::now()).await?;
    println!("swept {} expired entries", removed.len());
    Ok(())
}

pub async fn trim(cache: &ByteCache) -> Result<()> {
    disk(cache)?;
    let removed = cache.trim_disk_cache().await?;
    println!("trimmed {} entries", removed.len());
    Ok(())
}

pub async fn maintain(cache: &ByteCache) -> Result<()> {
    disk(cache)?;
    let report = cache
        .handle_host_event(HostEvent::EnteringBackground, SystemTime::now())
        .await?;
    println!(
        "swept {} expired entries, trimmed {} entries",
        report.expired.len(),
        report.trimmed.len()
    );
    Ok(())
}

pub async fn clear(cache: &ByteCache) -> Result<()> {
    disk(cache)?;
    cache.remove_all(Tiers::DISK).await?;
    println!("cleared");
    Ok(())
}
