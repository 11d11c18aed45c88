use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::defs::{ItemDescriptor, ListingFetch, SourceConfig};

/// A listing collaborator that serves fixed descriptors per source id.
///
/// Unknown sources are an error, matching what an HTTP fetch of a dead
/// listing address would look like to the caller.
#[derive(Debug, Default, Clone)]
pub struct StaticListing {
    listings: HashMap<String, Vec<ItemDescriptor>>,
}

impl StaticListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, source_id: impl Into<String>, items: Vec<ItemDescriptor>) -> Self {
        self.listings.insert(source_id.into(), items);
        self
    }
}

#[async_trait]
impl ListingFetch for StaticListing {
    async fn fetch_listing(&self, source: &SourceConfig) -> Result<Vec<ItemDescriptor>> {
        self.listings
            .get(&source.id)
            .cloned()
            .ok_or_else(|| anyhow!("no listing for source {}", source.id))
    }
}
