//! Folder Listing Cache
//!
//! Caches the most recent successful listing per folder using Moka.
//! Listings are served without a remote call while younger than the TTL; when a
//! refresh fails, the last known listing is served as a stale fallback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::CacheError;
use crate::remote::{AssetFilter, Connection, RemoteAsset};
use crate::retry::{self, RetryPolicy};

/// How long a listing is served without asking the remote store
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(300);

/// Oldest listing still served as a stale fallback
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest expiry the underlying moka cache accepts (1000 years)
pub const MAX_CACHE_DURATION: Duration = Duration::from_secs(1000 * 365 * 24 * 60 * 60);

/// One successful listing of a folder
#[derive(Debug)]
pub struct ListingEntry {
    /// Assets in the order the remote store listed them
    pub assets: Vec<RemoteAsset>,
    /// When the listing call returned
    pub fetched_at: Instant,
}

impl ListingEntry {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Result of a listing lookup
#[derive(Debug)]
pub enum Listing {
    /// Served from cache within the TTL
    Cached(Arc<ListingEntry>),
    /// Fetched from the remote store just now
    Fresh(Arc<ListingEntry>),
    /// Refresh failed; this is the last known listing
    Stale {
        entry: Arc<ListingEntry>,
        reason: CacheError,
    },
    /// Refresh failed and nothing was ever cached
    Unavailable(CacheError),
}

impl Listing {
    /// Listed assets; empty when unavailable
    pub fn assets(&self) -> &[RemoteAsset] {
        self.entry().map(|e| e.assets.as_slice()).unwrap_or(&[])
    }

    pub fn entry(&self) -> Option<&Arc<ListingEntry>> {
        match self {
            Listing::Cached(entry) | Listing::Fresh(entry) | Listing::Stale { entry, .. } => {
                Some(entry)
            }
            Listing::Unavailable(_) => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Listing::Stale { .. })
    }

    /// Failure behind a stale or unavailable result
    pub fn failure(&self) -> Option<&CacheError> {
        match self {
            Listing::Stale { reason, .. } | Listing::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Listing cache with TTL and stale fallback
pub struct ListingCache {
    /// Remote store handle
    connection: Arc<Connection>,
    /// Latest listing per folder; entries are replaced, never mutated
    entries: Cache<String, Arc<ListingEntry>>,
    /// Freshness window
    ttl: Duration,
    /// Hard cap on how old a stale fallback may be
    max_staleness: Option<Duration>,
    /// Retry policy for listing calls
    policy: RetryPolicy,
    /// Query sent with every listing call
    filter: AssetFilter,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl ListingCache {
    /// Create a listing cache with default TTL, staleness cap and retry policy
    pub fn new(connection: Arc<Connection>) -> Self {
        Self::with_config(
            connection,
            DEFAULT_LISTING_TTL,
            Some(DEFAULT_MAX_STALENESS),
            RetryPolicy::LISTING,
        )
    }

    /// Create a listing cache with custom settings
    ///
    /// # Arguments
    /// * `ttl` - How long a listing is served without a remote call
    /// * `max_staleness` - Oldest listing served as a fallback (`None` = no limit)
    /// * `policy` - Retry policy for listing calls
    pub fn with_config(
        connection: Arc<Connection>,
        ttl: Duration,
        max_staleness: Option<Duration>,
        policy: RetryPolicy,
    ) -> Self {
        let mut builder = Cache::builder().name("folder_listing_cache");
        if let Some(cap) = max_staleness {
            builder = builder.time_to_live(cap.min(MAX_CACHE_DURATION));
        }

        Self {
            connection,
            entries: builder.build(),
            ttl,
            max_staleness,
            policy,
            filter: AssetFilter::videos(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the listing of a folder
    ///
    /// Serves a cached listing younger than the TTL when `use_cache` is set. Otherwise
    /// lists the folder through the retry executor and replaces the cached entry. If
    /// that fails, the previous entry (if any) is returned as stale.
    pub async fn get_listing(&self, folder_id: &str, use_cache: bool) -> Listing {
        let cached = self.entries.get(folder_id);

        if use_cache {
            if let Some(entry) = &cached {
                if entry.age() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        folder = folder_id,
                        assets = entry.assets.len(),
                        "Cache HIT for folder listing"
                    );
                    return Listing::Cached(Arc::clone(entry));
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(folder = folder_id, use_cache = use_cache, "Cache MISS for folder listing");

        let Some(remote) = self.connection.get().await else {
            warn!(folder = folder_id, "Cannot list folder, remote store not available");
            return self.fallback(folder_id, cached, CacheError::Connection);
        };

        let result = retry::execute(&self.policy, "list_files", || {
            remote.list_files(folder_id, &self.filter)
        })
        .await;

        match result {
            Ok(assets) => {
                info!(folder = folder_id, count = assets.len(), "Listed video files");
                let entry = Arc::new(ListingEntry {
                    assets,
                    fetched_at: Instant::now(),
                });
                self.entries
                    .insert(folder_id.to_string(), Arc::clone(&entry));
                Listing::Fresh(entry)
            }
            Err(exhausted) => {
                self.fallback(folder_id, cached, CacheError::Exhausted(exhausted.into()))
            }
        }
    }

    /// Serve the previous listing after a failed refresh
    fn fallback(
        &self,
        folder_id: &str,
        cached: Option<Arc<ListingEntry>>,
        reason: CacheError,
    ) -> Listing {
        // A concurrent refresh may have landed while this one was failing
        let Some(entry) = self.entries.get(folder_id).or(cached) else {
            return Listing::Unavailable(reason);
        };

        if entry.age() < self.ttl {
            debug!(folder = folder_id, "Folder was refreshed concurrently, serving that listing");
            return Listing::Cached(entry);
        }

        if let Some(cap) = self.max_staleness {
            if entry.age() > cap {
                warn!(
                    folder = folder_id,
                    age_secs = entry.age().as_secs(),
                    "Cached listing too old to serve, dropping it"
                );
                self.entries.invalidate(folder_id);
                return Listing::Unavailable(reason);
            }
        }

        warn!(
            folder = folder_id,
            age_secs = entry.age().as_secs(),
            reason = %reason,
            "Using stale folder listing"
        );
        Listing::Stale { entry, reason }
    }

    /// Number of cached folders
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::{connected, FakeConnector, FakeStore};

    const FOLDER: &str = "sessions/pilot";

    fn sample_assets() -> Vec<RemoteAsset> {
        vec![
            RemoteAsset::new("id-1", "event_001.mp4"),
            RemoteAsset::new("id-2", "event_002.mp4"),
        ]
    }

    fn cache_with(store: &Arc<FakeStore>) -> ListingCache {
        ListingCache::new(connected(store))
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_within_ttl_is_served_from_cache() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = cache_with(&store);

        let first = cache.get_listing(FOLDER, true).await;
        assert!(matches!(first, Listing::Fresh(_)));
        assert_eq!(store.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.get_listing(FOLDER, true).await;
        assert!(matches!(second, Listing::Cached(_)));
        assert_eq!(store.list_calls(), 1);

        // Same entry, not a copy
        assert!(Arc::ptr_eq(first.entry().unwrap(), second.entry().unwrap()));
        assert_eq!(second.assets(), sample_assets().as_slice());
        assert_eq!(cache.stats(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_listing_is_refreshed() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = cache_with(&store);

        cache.get_listing(FOLDER, true).await;
        store.set_listing(FOLDER, vec![RemoteAsset::new("id-3", "event_003.mp4")]);

        tokio::time::advance(Duration::from_secs(300)).await;
        let listing = cache.get_listing(FOLDER, true).await;
        assert!(matches!(listing, Listing::Fresh(_)));
        assert_eq!(listing.assets()[0].name, "event_003.mp4");
        assert_eq!(store.list_calls(), 2);

        // Replaced wholesale, not merged
        assert_eq!(cache.entries.get(FOLDER).unwrap().assets.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_use_cache_false_always_lists() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = cache_with(&store);

        cache.get_listing(FOLDER, true).await;
        let listing = cache.get_listing(FOLDER, false).await;
        assert!(matches!(listing, Listing::Fresh(_)));
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_when_remote_fails() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = cache_with(&store);

        cache.get_listing(FOLDER, true).await;
        tokio::time::advance(Duration::from_secs(301)).await;

        store.set_offline(true);
        let listing = cache.get_listing(FOLDER, true).await;

        assert!(listing.is_stale());
        assert_eq!(listing.assets(), sample_assets().as_slice());
        assert!(matches!(listing.failure(), Some(CacheError::Exhausted(_))));
        // One initial call plus three attempts
        assert_eq!(store.list_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_when_not_connected() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = cache_with(&store);
        cache.get_listing(FOLDER, true).await;

        // Re-home the cached entry behind a connection that never comes up
        let offline = ListingCache::new(Arc::new(Connection::new(FakeConnector::never(
            Arc::clone(&store),
        ))));
        offline
            .entries
            .insert(FOLDER.to_string(), cache.entries.get(FOLDER).unwrap());
        tokio::time::advance(Duration::from_secs(301)).await;

        let listing = offline.get_listing(FOLDER, true).await;
        assert!(listing.is_stale());
        assert!(matches!(listing.failure(), Some(CacheError::Connection)));
        assert_eq!(listing.assets().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_cache_without_connection_is_empty() {
        let store = Arc::new(FakeStore::new());
        let cache = ListingCache::new(Arc::new(Connection::new(FakeConnector::never(
            Arc::clone(&store),
        ))));

        let listing = cache.get_listing(FOLDER, true).await;
        assert!(matches!(listing, Listing::Unavailable(CacheError::Connection)));
        assert!(listing.assets().is_empty());
        assert_eq!(store.list_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_cache_with_failing_remote_is_empty() {
        let store = Arc::new(FakeStore::new());
        store.set_offline(true);
        let cache = cache_with(&store);

        let listing = cache.get_listing(FOLDER, true).await;
        assert!(matches!(listing, Listing::Unavailable(CacheError::Exhausted(_))));
        assert!(listing.assets().is_empty());
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_with_backoff() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        store.fail_next_lists(2);
        let cache = cache_with(&store);

        let listing = cache.get_listing(FOLDER, true).await;
        assert!(matches!(listing, Listing::Fresh(_)));

        let times = store.list_call_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_cap_drops_old_listing() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = ListingCache::with_config(
            connected(&store),
            Duration::from_secs(300),
            Some(Duration::from_secs(3600)),
            RetryPolicy::LISTING,
        );

        cache.get_listing(FOLDER, true).await;
        tokio::time::advance(Duration::from_secs(3601)).await;
        store.set_offline(true);

        let listing = cache.get_listing(FOLDER, true).await;
        assert!(matches!(listing, Listing::Unavailable(_)));
        assert!(cache.entries.get(FOLDER).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrently_refreshed_listing_is_not_stale() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = cache_with(&store);

        cache.get_listing(FOLDER, true).await;
        let old = cache.entries.get(FOLDER).unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        // Without a newer entry the old one is served as stale
        let listing = cache.fallback(FOLDER, Some(Arc::clone(&old)), CacheError::Connection);
        assert!(listing.is_stale());

        // Another request refreshed the folder while this one was failing
        cache.get_listing(FOLDER, false).await;
        let listing = cache.fallback(FOLDER, Some(old), CacheError::Connection);
        assert!(matches!(listing, Listing::Cached(_)));
        assert!(!listing.is_stale());
        assert!(listing.failure().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_staleness_cap_is_clamped() {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, sample_assets());
        let cache = ListingCache::with_config(
            connected(&store),
            Duration::from_secs(u64::MAX),
            Some(Duration::from_secs(u64::MAX)),
            RetryPolicy::LISTING,
        );

        cache.get_listing(FOLDER, true).await;
        assert!(matches!(cache.get_listing(FOLDER, true).await, Listing::Cached(_)));
        assert_eq!(store.list_calls(), 1);
    }
}
