use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_archive::config::DEFAULT_CONFIG_FILE;
use feed_archive::{ArchiveConfig, Archiver, DirectorySink, LedgerStore};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feed-archive", version, about = "Archive channel listings and republish them as RSS")]
struct Cli {
    /// Path to the JSON configuration
    #[arg(long, env = "FEED_ARCHIVE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync every source, then rebuild all feeds
    Run,
    /// Fetch listings and acquire new items without touching feeds
    Sync {
        /// Only sync this source id
        #[arg(long)]
        source: Option<String>,
    },
    /// Rebuild feeds from the ledger
    Feeds,
    /// Show what the ledger holds per source
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ArchiveConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!(
        "Archive root {} with {} sources",
        config.root.display(),
        config.sources.len()
    );

    match cli.command {
        Command::Run => {
            let mut archiver = Archiver::from_config(config)?;
            let mut sink = DirectorySink::new(archiver.ledger().root());
            let (sync, build) = archiver.run(&mut sink).await?;
            for (source_id, reason) in &sync.failed_sources {
                error!("Source {} failed: {}", source_id, reason);
            }
            info!(
                "Recorded {} items, wrote {} feeds",
                sync.recorded(),
                build.written.len()
            );
            archiver.into_ledger().close();
        }
        Command::Sync { source } => {
            let mut archiver = Archiver::from_config(config)?;
            match source {
                Some(source_id) => {
                    let report = archiver.sync_one(&source_id).await?;
                    info!("Recorded {} items for {}", report.recorded, report.source_id);
                }
                None => {
                    let report = archiver.sync_all().await?;
                    info!("Recorded {} items", report.recorded());
                }
            }
            archiver.into_ledger().close();
        }
        Command::Feeds => {
            let archiver = Archiver::from_config(config)?;
            let mut sink = DirectorySink::new(archiver.ledger().root());
            let report = archiver.build_feeds(&mut sink)?;
            for location in &report.written {
                println!("{}", location);
            }
            archiver.into_ledger().close();
        }
        Command::Status => {
            let ledger = LedgerStore::open(&config.root)?;
            let load = ledger.load_report();
            if load.skipped > 0 {
                warn!("{} ledger lines could not be read", load.skipped);
            }
            if ledger.is_read_only() {
                warn!(
                    "Ledger declares unknown columns ({}); it will not be written",
                    load.unknown_columns.join(", ")
                );
            }
            println!("{} items in {}", ledger.len(), ledger.path().display());
            for (source_id, entries) in ledger.entries_by_source() {
                let configured = config.source(&source_id).is_some();
                let newest = entries
                    .first()
                    .map(|entry| entry.published_at.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{:<24} {:>6} items  newest {}{}",
                    source_id,
                    entries.len(),
                    newest,
                    if configured { "" } else { "  (not configured)" }
                );
            }
            ledger.close();
        }
    }

    Ok(())
}
