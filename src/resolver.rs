//! Asset Resolver - turns (folder, filename) into a local file
//!
//! Entry point used by the host: looks the filename up in the folder listing and
//! hands the matching asset to the download cache. Also owns cache administration.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheError, DownloadCache, Listing, ListingCache};
use crate::config::CacheConfig;
use crate::remote::Connection;
use crate::retry::RetryPolicy;

/// Outcome of resolving an asset
#[derive(Debug)]
pub enum Resolution {
    /// Asset is available at this local path
    Ready(PathBuf),
    /// The folder listing has no asset with this name
    NotFound,
    /// The asset may exist but cannot be fetched right now
    Unavailable(CacheError),
}

/// Video filenames of one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFilenames {
    /// Names in listing order
    pub filenames: Vec<String>,
    /// The listing is past its TTL because the refresh failed
    pub stale: bool,
}

/// Snapshot of cache state for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub connected: bool,
    pub listing_entries: u64,
    pub listing_hits: u64,
    pub listing_misses: u64,
    pub download_entries: usize,
    pub download_hits: u64,
    pub download_misses: u64,
}

/// Resolves assets through the listing and download caches
pub struct AssetResolver {
    /// Shared remote store handle
    connection: Arc<Connection>,
    /// Folder listings
    listings: ListingCache,
    /// Downloaded files
    downloads: DownloadCache,
}

impl AssetResolver {
    /// Create a resolver from already built caches
    pub fn new(connection: Arc<Connection>, listings: ListingCache, downloads: DownloadCache) -> Self {
        Self {
            connection,
            listings,
            downloads,
        }
    }

    /// Build both caches from configuration around one connection
    pub fn with_config(connection: Connection, config: &CacheConfig) -> io::Result<Self> {
        let connection = Arc::new(connection);

        let listings = ListingCache::with_config(
            Arc::clone(&connection),
            config.listing_ttl,
            config.max_staleness,
            RetryPolicy::LISTING,
        );
        let downloads = DownloadCache::with_config(
            Arc::clone(&connection),
            config.download_dir.clone(),
            RetryPolicy::DOWNLOAD,
        )?;

        Ok(Self::new(connection, listings, downloads))
    }

    /// Resolve `filename` in `folder_id` to a local file
    ///
    /// The name match is exact and case-sensitive; the first listed match wins. No
    /// download is attempted when nothing matches.
    pub async fn resolve(&self, filename: &str, folder_id: &str) -> Resolution {
        let listing = self.listings.get_listing(folder_id, true).await;

        let matching = listing
            .assets()
            .iter()
            .find(|asset| asset.name == filename)
            .cloned();

        let Some(asset) = matching else {
            return match listing {
                Listing::Unavailable(reason) => {
                    warn!(file = filename, folder = folder_id, error = %reason, "Cannot resolve video, folder listing unavailable");
                    Resolution::Unavailable(reason)
                }
                _ => {
                    warn!(file = filename, folder = folder_id, "Video not found in folder");
                    Resolution::NotFound
                }
            };
        };

        if let Some(reason) = listing.failure() {
            debug!(file = filename, folder = folder_id, reason = %reason, "Resolving against stale listing");
        }

        match self
            .downloads
            .get_local_path(&asset.remote_id, filename)
            .await
        {
            Ok(path) => Resolution::Ready(path),
            Err(e) => {
                warn!(file = filename, error = %e, "Video unavailable");
                Resolution::Unavailable(e)
            }
        }
    }

    /// Names of all listed videos in a folder, in listing order
    ///
    /// `use_cache: false` bypasses the listing TTL. A failed refresh still yields the
    /// last known names, flagged as stale; only a folder never listed is an error.
    pub async fn list_all_filenames(
        &self,
        folder_id: &str,
        use_cache: bool,
    ) -> Result<FolderFilenames, CacheError> {
        let listing = self.listings.get_listing(folder_id, use_cache).await;
        let stale = listing.is_stale();

        match listing {
            Listing::Unavailable(reason) => Err(reason),
            listing => Ok(FolderFilenames {
                filenames: listing.assets().iter().map(|a| a.name.clone()).collect(),
                stale,
            }),
        }
    }

    /// Delete all downloaded files and forget them. Folder listings are kept.
    ///
    /// # Returns
    /// Number of files deleted
    pub fn clear_download_cache(&self) -> usize {
        let removed = self.downloads.clear();
        info!(removed = removed, "Video cache cleared");
        removed
    }

    /// Current cache counters
    pub fn status(&self) -> CacheStatus {
        let (listing_hits, listing_misses) = self.listings.stats();
        let (download_hits, download_misses) = self.downloads.stats();

        CacheStatus {
            connected: self.connection.is_connected(),
            listing_entries: self.listings.entry_count(),
            listing_hits,
            listing_misses,
            download_entries: self.downloads.entry_count(),
            download_hits,
            download_misses,
        }
    }
}
