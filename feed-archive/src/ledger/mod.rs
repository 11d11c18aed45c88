//! Persistent record of every item materialized into the archive.
//!
//! The ledger is the single answer to "have we already processed this
//! item". It lives in a human-readable, tab-delimited file at the archive
//! root (see [`codec`] for the line format) and is fully loaded into memory
//! at [`LedgerStore::open`].

pub mod codec;
pub mod store;

use std::cmp::Ordering;

use crate::types::LedgerEntry;

pub use store::{LedgerStore, LEDGER_FILE};

/// Read access used by the synchronizer and feed generation.
pub trait LedgerView {
    fn has(&self, item_id: &str) -> bool;

    /// Entries of one source, newest first.
    fn entries_for(&self, source_id: &str) -> Vec<LedgerEntry>;
}

/// Total order for entries: newest `published_at` first, then `item_id`
/// ascending so equal dates always land the same way.
pub fn publish_order(a: &LedgerEntry, b: &LedgerEntry) -> Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| a.item_id.cmp(&b.item_id))
}
