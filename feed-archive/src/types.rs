use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use interfaces::defs::{
    AcquiredContent, AcquisitionError, ContentAcquirer, ItemDescriptor, ListingFetch, MediaKind,
    MediaMetadata, SourceConfig,
};

/// The durable record for one materialized item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub source_id: String,
    pub item_id: String,
    pub title: String,
    /// Root-relative, `/`-separated once the entry has gone through the store.
    pub local_path: String,
    pub size_bytes: u64,
    pub media_kind: MediaKind,
    pub published_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub description: Option<String>,
    pub duration_seconds: Option<u64>,
}

impl LedgerEntry {
    /// Build the entry for a freshly acquired item. `recorded_at` is
    /// provisional; the store stamps it when the record is written.
    pub fn from_acquisition(source_id: &str, item: &ItemDescriptor, acquired: &AcquiredContent) -> Self {
        Self {
            source_id: source_id.to_string(),
            item_id: item.id.clone(),
            title: item.title.clone(),
            local_path: acquired.local_path.to_string_lossy().into_owned(),
            size_bytes: acquired.size_bytes,
            media_kind: acquired.media_kind,
            published_at: item.published_at,
            recorded_at: Utc::now(),
            description: item.description.clone(),
            duration_seconds: acquired.duration_seconds,
        }
    }
}

/// Outcome of loading the backing file at open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub recovered: usize,
    pub skipped: usize,
    pub normalized: usize,
    pub duplicates: usize,
    pub upgraded_schema: bool,
    /// Header columns written by a newer version. Non-empty means the store
    /// is read-only.
    pub unknown_columns: Vec<String>,
}

impl LoadReport {
    pub fn needs_compaction(&self) -> bool {
        self.unknown_columns.is_empty() && (self.normalized > 0 || self.duplicates > 0 || self.upgraded_schema)
    }
}

/// Locations written by a feed build, plus sources skipped for being empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceSyncReport {
    pub source_id: String,
    pub listed: usize,
    pub new_items: usize,
    pub recorded: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub sources: Vec<SourceSyncReport>,
    /// Sources whose listing could not be fetched, with the reason.
    pub failed_sources: Vec<(String, String)>,
}

impl SyncReport {
    pub fn recorded(&self) -> usize {
        self.sources.iter().map(|s| s.recorded).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Ledger storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write ledger {path}: {source}")]
    StorageWriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Ledger {path} declares columns this version cannot write: {columns}")]
    UnsupportedLayout { path: PathBuf, columns: String },

    #[error("Malformed ledger record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("No configured source for {0}")]
    UnknownSourceReference(String),

    #[error("Invalid ledger entry: {0}")]
    InvalidEntry(String),

    #[error("Listing for {source_id} unavailable: {reason}")]
    Listing { source_id: String, reason: String },

    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Feed render error: {0}")]
    Render(String),

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
