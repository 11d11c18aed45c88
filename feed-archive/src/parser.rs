use crate::types::{ArchiveError, ItemDescriptor, MediaMetadata, Result};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// Prefix YouTube puts in front of video ids in its Atom listings.
const YOUTUBE_ID_PREFIX: &str = "yt:video:";

/// Turns an RSS/Atom listing into item descriptors, keeping document order.
#[derive(Debug, Default)]
pub struct ListingParser;

impl ListingParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_listing(&self, content: &[u8]) -> Result<Vec<ItemDescriptor>> {
        debug!("Parsing listing ({} bytes)", content.len());

        let feed = parser::parse(content)
            .map_err(|e| ArchiveError::Parse(format!("Failed to parse listing: {}", e)))?;

        let total = feed.entries.len();
        let mut seen_ids = HashSet::new();
        let mut items = Vec::with_capacity(total);

        for entry in feed.entries {
            let Some(item) = Self::parse_entry(entry) else {
                continue;
            };
            if !seen_ids.insert(item.id.clone()) {
                debug!("Skipping duplicate listing entry: {}", item.id);
                continue;
            }
            items.push(item);
        }

        info!("Parsed listing with {} of {} entries usable", items.len(), total);
        Ok(items)
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<ItemDescriptor> {
        let id = entry
            .id
            .strip_prefix(YOUTUBE_ID_PREFIX)
            .unwrap_or(&entry.id)
            .trim()
            .to_string();
        if id.is_empty() {
            debug!("Skipping listing entry without id");
            return None;
        }

        let Some(url) = entry.links.first().map(|link| link.href.clone()) else {
            debug!("Skipping listing entry {} without link", id);
            return None;
        };

        let Some(published_at) = entry.published.or(entry.updated) else {
            debug!("Skipping listing entry {} without date", id);
            return None;
        };

        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        // YouTube carries the description inside media:group rather than summary.
        let description = entry
            .summary
            .map(|s| s.content)
            .or_else(|| {
                entry
                    .media
                    .iter()
                    .find_map(|media| media.description.as_ref().map(|d| d.content.clone()))
            })
            .filter(|text| !text.trim().is_empty());

        let media = entry
            .media
            .iter()
            .flat_map(|media| media.thumbnails.iter())
            .next()
            .map(|thumbnail| MediaMetadata {
                thumbnail_url: Some(thumbnail.image.uri.clone()),
                width: thumbnail.image.width,
                height: thumbnail.image.height,
            });

        Some(ItemDescriptor {
            id,
            title,
            url,
            published_at,
            description,
            media,
        })
    }

    pub fn is_valid_listing_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();
        content_lower.contains("<rss") || content_lower.contains("<feed") || content_lower.contains("<channel")
    }
}
