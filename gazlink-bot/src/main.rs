//! gazlink-bot - command-line entry point
//!
//! Subcommands:
//! - `run` (default): one reconciliation pass
//! - `inventory`: list files in the gazetteer distribution
//! - `stats`: count persisted links and negative cache entries

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gazlink_bot::config::{ConfigSource, CONFIG_FILE_NAME};
use gazlink_bot::dataset::list_files;
use gazlink_bot::{
    reconcile, BotConfig, Credentials, ForeignSource, LinkStore, ReqwestBackend, RunOptions,
    SqliteDataset, Transport,
};
use gazlink_common::config::{ensure_root_folder, resolve_root_folder, ROOT_FOLDER_ENV};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Command-line arguments for gazlink-bot
#[derive(Parser, Debug)]
#[command(name = "gazlink-bot")]
#[command(about = "Link gazetteer places to knowledge-base entities")]
#[command(version)]
struct Args {
    /// Root folder holding the config, link store and dataset
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Config file (default: <root>/gazlink-bot.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile correspondence records and write back-references
    Run {
        /// Foreign source to reconcile (wd or gn); overrides the config
        #[arg(long)]
        source: Option<ForeignSource>,

        /// Resolve and validate only; write and persist nothing
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many candidates
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List the files in the gazetteer distribution inventory
    Inventory,
    /// Show counts of persisted links and negative cache entries
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV);
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| root_folder.join(CONFIG_FILE_NAME));

    // Config is read before the subscriber exists, so its source is logged below
    let loaded = BotConfig::load_with_source(&config_path);
    let level = loaded
        .as_ref()
        .map(|(c, _)| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    info!(
        "Starting gazlink-bot v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let (config, source) =
        loaded.with_context(|| format!("Invalid config {}", config_path.display()))?;
    match source {
        ConfigSource::File => info!("Loaded config from {}", config_path.display()),
        ConfigSource::Defaults => warn!(
            "Config file {} not found, using built-in defaults",
            config_path.display()
        ),
    }
    ensure_root_folder(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let backend = ReqwestBackend::new(&config.user_agent, config.request_timeout())?;
    let transport = Transport::new(Arc::new(backend), config.retry.policy());

    match args.command.unwrap_or(Command::Run {
        source: None,
        dry_run: false,
        limit: None,
    }) {
        Command::Run {
            source,
            dry_run,
            limit,
        } => {
            let options = RunOptions {
                source,
                dry_run,
                limit,
            };
            run(&transport, &config, &root_folder, &options).await
        }
        Command::Inventory => {
            let files = list_files(&transport, &config.inventory_url)
                .await
                .context("Failed to fetch inventory")?;
            for file in files {
                println!(
                    "{}\t{}\t{}\t{}",
                    file.name, file.last_modified, file.repo, file.checksum
                );
            }
            Ok(())
        }
        Command::Stats => {
            let store = LinkStore::open(&config.database_path(&root_folder)).await?;
            let (links, negatives) = store.counts().await?;
            println!("links: {}\nnegative: {}", links, negatives);
            store.close().await;
            Ok(())
        }
    }
}

async fn run(
    transport: &Transport,
    config: &BotConfig,
    root_folder: &std::path::Path,
    options: &RunOptions,
) -> Result<()> {
    let credentials = Credentials::from_env(&config.username)?;

    let db_path = config.database_path(root_folder);
    info!("Link store: {}", db_path.display());
    let store = LinkStore::open(&db_path)
        .await
        .context("Failed to open link store")?;

    let dataset_path = config.dataset_path(root_folder);
    info!("Dataset: {}", dataset_path.display());
    let dataset = SqliteDataset::open(&dataset_path)
        .await
        .context("Failed to open gazetteer dataset")?;

    let result = reconcile(transport, &store, &dataset, config, &credentials, options).await;
    store.close().await;

    match result {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!("Reconciliation aborted: {}", e);
            Err(e.into())
        }
    }
}
