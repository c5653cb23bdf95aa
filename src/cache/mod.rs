//! Caching layer
//!
//! Two caches sit in front of the remote store: folder listings (TTL with stale
//! fallback) and downloaded asset files on local disk.

pub mod download;
pub mod errors;
pub mod listing;

pub use download::DownloadCache;
pub use errors::CacheError;
pub use listing::{Listing, ListingCache};
