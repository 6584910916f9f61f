use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use framecache_config::{CacheConfig, ConfigSource};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "framecachectl", version)]
#[command(about = "Inspect and maintain framecache disk stores")]
struct Cli {
    /// Cache config file (TOML or JSON). Defaults to $FRAMECACHE_CONFIG_PATH,
    /// then ./framecache.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disk root holding store directories (overrides config)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Store directory name below the root (overrides config)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show disk usage, entry count and configured limits
    Stat {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Store a payload under KEY
    Put {
        key: String,
        /// File to read, or '-' for stdin
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Write the payload for KEY to stdout or a file
    Get {
        key: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Remove the entry for KEY
    Rm { key: String },
    /// Remove expired and orphaned entries
    Sweep,
    /// Trim to half the size limit if the limit has been reached
    Trim,
    /// Sweep, then trim (what a host does when an app goes to background)
    Maintain,
    /// Remove every entry, keeping the store directory
    Clear,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,framecache_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let (mut config, source) = match &cli.config {
        Some(path) => {
            let mut config = CacheConfig::load_from_file(path)?;
            config.apply_overrides(|name| std::env::var(name).ok())?;
            (config, ConfigSource::Explicit(path.clone()))
        }
        None => CacheConfig::load_from_env()?,
    };
    info!(?source, "using cache config");

    if let Some(root) = &cli.root {
        config.disk.enabled = true;
        config.disk.root = Some(root.clone());
    }
    if let Some(store) = &cli.store {
        config.store_name = store.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli).context("failed to load cache config")?;
    let cache = commands::open_store(&config)?;

    match cli.command {
        Command::Stat { json } => commands::stat(&cache, json).await,
        Command::Put { key, file } => commands::put(&cache, key, &file).await,
        Command::Get { key, output } => {
            commands::get(&cache, key, output.as_deref()).await
        }
        Command::Rm { key } => commands::rm(&cache, key).await,
        Command::Sweep => commands::sweep(&cache).await,
        Command::Trim => commands::trim(&cache).await,
        Command::Maintain => commands::maintain(&cache).await,
        Command::Clear => commands::clear(&cache).await,
    }
}
