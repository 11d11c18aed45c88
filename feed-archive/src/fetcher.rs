use crate::config::FetchConfig;
use crate::parser::ListingParser;
use crate::types::{ArchiveError, ItemDescriptor, ListingFetch, Result, SourceConfig};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// HTTP listing collaborator: downloads a source's listing and parses it.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    parser: ListingParser,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            parser: ListingParser::new(),
        })
    }

    /// Fetch the raw listing body, retrying transient failures with backoff.
    pub async fn fetch_listing_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)?;
        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| ArchiveError::Config(format!("Invalid file URL: {}", url)))?;
            return Ok(tokio::fs::read(&path).await?);
        }

        let start_time = Instant::now();
        let mut backoff = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(url).await {
                Ok(body) => {
                    info!(
                        "Fetched listing {} ({} bytes in {}ms)",
                        url,
                        body.len(),
                        start_time.elapsed().as_millis()
                    );
                    return Ok(body);
                }
                // Oversized bodies will not shrink on retry.
                Err(e @ ArchiveError::FeedTooLarge { .. }) => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        error!("Failed to fetch listing after {} attempts: {}", self.config.max_retries + 1, url);
        Err(last_error.unwrap_or_else(|| ArchiveError::Parse(format!("No response from {}", url))))
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching listing: {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;

        let limit = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(ArchiveError::FeedTooLarge {
                    size_mb: content_length as usize / (1024 * 1024),
                });
            }
        }

        let body = response.bytes().await?;
        if body.len() > limit {
            return Err(ArchiveError::FeedTooLarge {
                size_mb: body.len() / (1024 * 1024),
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ListingFetch for Fetcher {
    async fn fetch_listing(&self, source: &SourceConfig) -> anyhow::Result<Vec<ItemDescriptor>> {
        let body = self.fetch_listing_bytes(&source.listing_url).await?;
        if !ListingParser::is_valid_listing_content(&String::from_utf8_lossy(&body)) {
            warn!("Listing for {} does not look like RSS or Atom", source.id);
        }
        Ok(self.parser.parse_listing(&body)?)
    }
}
