//! Durable archive of remote channel content, republished as RSS feeds.
//!
//! The [`ledger`] remembers every item ever materialized, the
//! [`synchronizer`] works out which listed items are new, and the
//! [`feed_generator`] turns the ledger back into per-source and aggregate
//! documents. [`pipeline::Archiver`] drives the three with the default
//! [`fetcher`] and [`acquirer`] collaborators.

pub mod acquirer;
pub mod config;
pub mod feed_generator;
pub mod fetcher;
pub mod ledger;
pub mod parser;
pub mod pipeline;
pub mod synchronizer;
pub mod types;
pub mod utils;

pub use acquirer::CommandAcquirer;
pub use config::{AcquisitionConfig, ArchiveConfig, FetchConfig};
pub use feed_generator::{
    build_aggregate_feed, build_all, build_source_feed, AggregateMeta, DirectorySink, FeedDocument, FeedOptions,
    MemorySink, OutputSink,
};
pub use fetcher::Fetcher;
pub use ledger::{LedgerStore, LedgerView};
pub use parser::ListingParser;
pub use pipeline::Archiver;
pub use synchronizer::Synchronizer;
pub use types::*;
