//! Archive configuration, read from a JSON file.
//!
//! `FEED_ARCHIVE_ROOT` and `FEED_ARCHIVE_BASE_URL` override the matching
//! fields so the same file can serve local and hosted builds.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::feed_generator::{AggregateMeta, FeedOptions};
use crate::types::{ArchiveError, Result, SourceConfig};
use crate::utils::url::is_valid_feed_url;

pub const DEFAULT_CONFIG_FILE: &str = "feed-archive.json";
pub const ROOT_ENV: &str = "FEED_ARCHIVE_ROOT";
pub const BASE_URL_ENV: &str = "FEED_ARCHIVE_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("feed-archive/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

/// How the external downloader is invoked.
///
/// `args` may use `{url}`, `{output}` and `{format}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub program: String,
    pub args: Vec<String>,
    pub max_attempts: u32,
    pub retry_delay_seconds: u64,
    pub concurrency: usize,
    pub audio_format: String,
    pub video_format: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: vec![
                "--no-progress".to_string(),
                "-f".to_string(),
                "{format}".to_string(),
                "-o".to_string(),
                "{output}".to_string(),
                "{url}".to_string(),
            ],
            max_attempts: 3,
            retry_delay_seconds: 5,
            concurrency: 2,
            audio_format: "bestaudio".to_string(),
            video_format: "bestvideo+bestaudio/best".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub artwork: Option<String>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        let meta = AggregateMeta::default();
        Self {
            slug: meta.slug,
            title: meta.title,
            description: meta.description,
            artwork: meta.artwork,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    pub base_url: Option<String>,
    pub max_items: usize,
    /// New items taken per source per run.
    pub sync_limit: usize,
    pub aggregate: AggregateConfig,
    pub fetch: FetchConfig,
    pub acquisition: AcquisitionConfig,
    pub sources: Vec<SourceConfig>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("archive"),
            base_url: None,
            max_items: crate::feed_generator::DEFAULT_MAX_ITEMS,
            sync_limit: 5,
            aggregate: AggregateConfig::default(),
            fetch: FetchConfig::default(),
            acquisition: AcquisitionConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl ArchiveConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_ENV) {
            self.root = PathBuf::from(root);
        }
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            self.base_url = Some(base_url).filter(|s| !s.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ArchiveError::Config(msg));

        if self.sync_limit == 0 {
            return invalid("sync_limit must be greater than zero".to_string());
        }
        if self.max_items == 0 {
            return invalid("max_items must be greater than zero".to_string());
        }
        if self.acquisition.max_attempts == 0 {
            return invalid("acquisition.max_attempts must be at least 1".to_string());
        }
        if self.acquisition.concurrency == 0 {
            return invalid("acquisition.concurrency must be at least 1".to_string());
        }
        if self.aggregate.slug.trim().is_empty() {
            return invalid("aggregate.slug must not be empty".to_string());
        }
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url)?;
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return invalid(format!("source {:?} has an empty id", source.label));
            }
            if source.id.contains(['/', '\\', '\t', '\n']) {
                return invalid(format!("source id {:?} must be a plain slug", source.id));
            }
            if source.id == self.aggregate.slug {
                return invalid(format!("source id {:?} collides with the aggregate feed", source.id));
            }
            if !ids.insert(source.id.as_str()) {
                return invalid(format!("duplicate source id {:?}", source.id));
            }
            if !is_valid_feed_url(&source.listing_url) {
                return invalid(format!(
                    "source {} has an invalid listing URL {:?}",
                    source.id, source.listing_url
                ));
            }
        }
        Ok(())
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.id == id)
    }

    pub fn feed_options(&self) -> Result<FeedOptions> {
        let base_url = self.base_url.as_deref().map(Url::parse).transpose()?;
        Ok(FeedOptions {
            max_items: Some(self.max_items),
            base_url,
            aggregate: AggregateMeta {
                slug: self.aggregate.slug.clone(),
                title: self.aggregate.title.clone(),
                description: self.aggregate.description.clone(),
                artwork: self.aggregate.artwork.clone(),
            },
        })
    }
}
