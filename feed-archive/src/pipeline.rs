//! Orchestration: fetch listing, diff against the ledger, acquire the new
//! items, record them, then render feeds.
//!
//! Acquisition runs concurrently, but every ledger write happens on the task
//! driving [`Archiver::sync_source`], one result at a time.

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::acquirer::CommandAcquirer;
use crate::config::{AcquisitionConfig, ArchiveConfig};
use crate::feed_generator::{self, OutputSink};
use crate::fetcher::Fetcher;
use crate::ledger::LedgerStore;
use crate::synchronizer::Synchronizer;
use crate::types::{
    AcquiredContent, AcquisitionError, ArchiveError, BuildReport, ContentAcquirer, ItemDescriptor, LedgerEntry,
    ListingFetch, Result, SourceConfig, SourceSyncReport, SyncReport,
};

pub struct Archiver {
    config: ArchiveConfig,
    ledger: LedgerStore,
    listings: Arc<dyn ListingFetch>,
    acquirer: Arc<dyn ContentAcquirer>,
}

impl Archiver {
    pub fn new(
        config: ArchiveConfig,
        ledger: LedgerStore,
        listings: Arc<dyn ListingFetch>,
        acquirer: Arc<dyn ContentAcquirer>,
    ) -> Self {
        Self {
            config,
            ledger,
            listings,
            acquirer,
        }
    }

    /// Open the ledger at the configured root and wire the default HTTP
    /// fetcher and command acquirer.
    pub fn from_config(config: ArchiveConfig) -> Result<Self> {
        let ledger = LedgerStore::open(&config.root)?;
        let fetcher = Fetcher::new(config.fetch.clone())?;
        let acquirer = CommandAcquirer::new(config.acquisition.clone());
        Ok(Self::new(config, ledger, Arc::new(fetcher), Arc::new(acquirer)))
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn into_ledger(self) -> LedgerStore {
        self.ledger
    }

    /// Bring one source up to date.
    ///
    /// Item failures are logged and listed in the report. A listing failure
    /// fails this source only; a ledger write failure is returned as is.
    pub async fn sync_source(&mut self, source: &SourceConfig) -> Result<SourceSyncReport> {
        let listing = self
            .listings
            .fetch_listing(source)
            .await
            .map_err(|e| ArchiveError::Listing {
                source_id: source.id.clone(),
                reason: format!("{:#}", e),
            })?;

        let new_items = Synchronizer::new(&self.ledger).diff(&source.id, &listing, self.config.sync_limit);
        let mut report = SourceSyncReport {
            source_id: source.id.clone(),
            listed: listing.len(),
            new_items: new_items.len(),
            ..Default::default()
        };
        if new_items.is_empty() {
            info!("Source {} is up to date ({} listed)", source.id, listing.len());
            return Ok(report);
        }

        info!("Source {}: acquiring {} new items", source.id, new_items.len());
        let dest_dir = source_dir(self.ledger.root(), &source.id);
        let retry = self.config.acquisition.clone();

        let mut results = stream::iter(new_items)
            .map(|item| {
                let acquirer = Arc::clone(&self.acquirer);
                let dest_dir = dest_dir.clone();
                let retry = retry.clone();
                async move {
                    let result = acquire_with_retry(acquirer.as_ref(), &retry, source, &item, &dest_dir).await;
                    (item, result)
                }
            })
            .buffer_unordered(retry.concurrency);

        while let Some((item, result)) = results.next().await {
            let acquired = match result {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!("Giving up on {} from {}: {}", item.id, source.id, e);
                    report.failed.push(item.id);
                    continue;
                }
            };

            let entry = LedgerEntry::from_acquisition(&source.id, &item, &acquired);
            match self.ledger.record_entry(entry) {
                Ok(()) => {
                    debug!("Recorded {} ({})", item.id, item.title);
                    report.recorded += 1;
                }
                Err(ArchiveError::InvalidEntry(reason)) => {
                    warn!("Not recording {} from {}: {}", item.id, source.id, reason);
                    report.failed.push(item.id);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Source {}: recorded {} of {} new items ({} failed)",
            source.id,
            report.recorded,
            report.new_items,
            report.failed.len()
        );
        Ok(report)
    }

    /// Sync every configured source in order.
    pub async fn sync_all(&mut self) -> Result<SyncReport> {
        let sources = self.config.sources.clone();
        let mut report = SyncReport::default();

        for source in &sources {
            match self.sync_source(source).await {
                Ok(source_report) => report.sources.push(source_report),
                Err(ArchiveError::Listing { source_id, reason }) => {
                    error!("Failed to sync {}: {}", source_id, reason);
                    report.failed_sources.push((source_id, reason));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Synced {} sources: {} items recorded, {} sources failed",
            sources.len(),
            report.recorded(),
            report.failed_sources.len()
        );
        Ok(report)
    }

    /// Sync a single configured source by id.
    pub async fn sync_one(&mut self, source_id: &str) -> Result<SourceSyncReport> {
        let source = self
            .config
            .source(source_id)
            .cloned()
            .ok_or_else(|| ArchiveError::UnknownSourceReference(source_id.to_string()))?;
        self.sync_source(&source).await
    }

    pub fn build_feeds(&self, sink: &mut dyn OutputSink) -> Result<BuildReport> {
        let options = self.config.feed_options()?;
        feed_generator::build_all(&self.config.sources, &self.ledger.entries_by_source(), sink, &options)
    }

    /// Sync everything, then rebuild every feed.
    pub async fn run(&mut self, sink: &mut dyn OutputSink) -> Result<(SyncReport, BuildReport)> {
        let sync = self.sync_all().await?;
        let build = self.build_feeds(sink)?;
        Ok((sync, build))
    }
}

/// Retrying cannot fix a missing program or an unsupported container.
fn is_retryable(error: &AcquisitionError) -> bool {
    !matches!(
        error,
        AcquisitionError::Spawn { .. } | AcquisitionError::UnknownContainer(_)
    )
}

async fn acquire_with_retry(
    acquirer: &dyn ContentAcquirer,
    config: &AcquisitionConfig,
    source: &SourceConfig,
    item: &ItemDescriptor,
    dest_dir: &Path,
) -> std::result::Result<AcquiredContent, AcquisitionError> {
    let delay = Duration::from_secs(config.retry_delay_seconds);
    let mut backoff = ExponentialBackoff {
        current_interval: delay,
        initial_interval: delay,
        max_interval: delay * 16,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    };

    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match acquirer.acquire(source, item, dest_dir).await {
            Ok(acquired) => return Ok(acquired),
            Err(e) if attempt < attempts && is_retryable(&e) => {
                let wait = backoff.next_backoff().unwrap_or(delay);
                warn!(
                    "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt, attempts, item.id, e, wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Where a source's artifacts live under `root`.
pub fn source_dir(root: &Path, source_id: &str) -> PathBuf {
    root.join(source_id)
}
