use std::collections::HashSet;
use tracing::debug;

use crate::ledger::LedgerView;
use crate::types::ItemDescriptor;

/// Computes which listed items the ledger has not seen yet.
pub struct Synchronizer<'a, L: LedgerView + ?Sized> {
    ledger: &'a L,
}

impl<'a, L: LedgerView + ?Sized> Synchronizer<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self { ledger }
    }

    /// Keep unseen descriptors in upstream order, stopping after `limit` kept.
    ///
    /// The listing is not re-sorted: upstream order (newest first by
    /// convention) decides which items fit under the limit.
    pub fn diff(&self, source_id: &str, listing: &[ItemDescriptor], limit: usize) -> Vec<ItemDescriptor> {
        let mut kept = Vec::new();
        if limit == 0 {
            return kept;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut known = 0usize;
        let mut scanned = 0usize;

        for item in listing {
            if kept.len() >= limit {
                break;
            }
            scanned += 1;
            if self.ledger.has(&item.id) {
                known += 1;
                continue;
            }
            if !seen.insert(item.id.as_str()) {
                debug!("Listing for {} repeats item {}", source_id, item.id);
                continue;
            }
            kept.push(item.clone());
        }

        debug!(
            "Source {}: scanned {} of {} listed, {} already recorded, {} new",
            source_id,
            scanned,
            listing.len(),
            known,
            kept.len()
        );
        kept
    }
}
