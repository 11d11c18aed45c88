pub mod defs;
pub mod static_listing;

pub use defs::{
    AcquiredContent, AcquisitionError, ContentAcquirer, ItemDescriptor, ListingFetch,
    MediaKind, MediaMetadata, SourceConfig,
};
pub use static_listing::StaticListing;
