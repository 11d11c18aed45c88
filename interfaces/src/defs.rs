use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One piece of remote content as listed by an upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub id: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub description: Option<String>,
    pub media: Option<MediaMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub thumbnail_url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Container family of a materialized artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// Derive the kind from a container extension (`m4a`, `mp4`, ...).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "m4a" | "aac" | "opus" | "ogg" | "oga" | "flac" | "wav" => Some(Self::Audio),
            "mp4" | "m4v" | "webm" | "mkv" | "mov" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// MIME type for an enclosure, preferring the artifact's own extension.
    pub fn mime_type(&self, path: &str) -> &'static str {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match (self, ext.as_deref()) {
            (_, Some("mp3")) => "audio/mpeg",
            (_, Some("m4a")) | (_, Some("aac")) => "audio/mp4",
            (_, Some("opus")) | (_, Some("ogg")) | (_, Some("oga")) => "audio/ogg",
            (_, Some("flac")) => "audio/flac",
            (_, Some("wav")) => "audio/wav",
            (_, Some("webm")) => "video/webm",
            (_, Some("mkv")) => "video/x-matroska",
            (_, Some("mov")) => "video/quicktime",
            (_, Some("m4v")) => "video/x-m4v",
            (Self::Audio, _) => "audio/mpeg",
            (Self::Video, _) => "video/mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured channel. The `id` doubles as the on-disk slug and must not
/// change once items have been recorded under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub label: String,
    pub listing_url: String,
    #[serde(default = "default_media")]
    pub preferred_media: MediaKind,
    #[serde(default)]
    pub description: Option<String>,
    /// Root-relative path of the channel artwork.
    #[serde(default)]
    pub artwork: Option<String>,
}

fn default_media() -> MediaKind {
    MediaKind::Audio
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, label: impl Into<String>, listing_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            listing_url: listing_url.into(),
            preferred_media: MediaKind::Audio,
            description: None,
            artwork: None,
        }
    }

    pub fn artwork_path(&self) -> String {
        self.artwork
            .clone()
            .unwrap_or_else(|| format!("{}/artwork.jpg", self.id))
    }
}

/// What content acquisition hands back on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredContent {
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub media_kind: MediaKind,
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("no artifact produced for {item_id} in {dir}")]
    MissingArtifact { item_id: String, dir: PathBuf },

    #[error("unrecognized container for {0}")]
    UnknownContainer(PathBuf),

    #[error("{0}")]
    Other(String),
}

/// Produces the remote listing for a source, newest first by convention.
#[async_trait]
pub trait ListingFetch: Send + Sync {
    async fn fetch_listing(&self, source: &SourceConfig) -> Result<Vec<ItemDescriptor>>;
}

/// Materializes a single item under `dest_dir`.
#[async_trait]
pub trait ContentAcquirer: Send + Sync {
    async fn acquire(
        &self,
        source: &SourceConfig,
        item: &ItemDescriptor,
        dest_dir: &Path,
    ) -> std::result::Result<AcquiredContent, AcquisitionError>;
}

// Object style note:
// Collaborators are expected to be cheap, mostly stateless values. Anything
// durable (what has been seen, what has been written) belongs to the ledger
// in the feed-archive crate, never to an implementation of these traits.
