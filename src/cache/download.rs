//! Local Download Cache
//!
//! Downloads remote assets into uniquely named temporary files and remembers them,
//! so an asset is fetched once per process. Every hit is re-validated against the
//! filesystem; a cached path whose file vanished is evicted and downloaded again.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use super::CacheError;
use crate::remote::{AssetDownload, Connection, RemoteError, RemoteStore};
use crate::retry::{self, Exhausted, RetryPolicy, Retryable};

/// Prefix of every file this cache creates
const TEMP_PREFIX: &str = "videocache-";

/// Extension used when the filename has none
const DEFAULT_SUFFIX: &str = ".mp4";

/// Identifies one downloaded asset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadKey {
    pub remote_id: String,
    pub filename: String,
}

impl DownloadKey {
    pub fn new(remote_id: &str, filename: &str) -> Self {
        Self {
            remote_id: remote_id.to_string(),
            filename: filename.to_string(),
        }
    }
}

/// A downloaded file owned by the cache
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Path to the downloaded file on disk
    local_path: PathBuf,
    /// Size of the file in bytes
    size: u64,
    /// When the download finished
    downloaded_at: SystemTime,
}

/// Why a single download attempt failed
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local I/O: {0}")]
    LocalIo(#[from] io::Error),
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Remote(e) => e.is_retryable(),
            AttemptError::LocalIo(_) => false,
        }
    }
}

impl From<Exhausted<AttemptError>> for CacheError {
    /// A final attempt that failed locally is reported as local I/O, not as a remote failure
    fn from(exhausted: Exhausted<AttemptError>) -> Self {
        match exhausted.last_error {
            AttemptError::LocalIo(e) => CacheError::LocalIo(e),
            remote => CacheError::Exhausted(
                Exhausted {
                    operation: exhausted.operation,
                    attempts: exhausted.attempts,
                    last_error: remote,
                }
                .into(),
            ),
        }
    }
}

/// Local disk cache for downloaded assets
pub struct DownloadCache {
    /// Remote store handle
    connection: Arc<Connection>,
    /// Directory the temporary files are created in
    download_dir: PathBuf,
    /// Retry policy for download calls
    policy: RetryPolicy,
    /// Downloaded files by key
    entries: Mutex<HashMap<DownloadKey, CacheEntry>>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl DownloadCache {
    /// Create a download cache with custom configuration
    ///
    /// # Arguments
    /// * `download_dir` - Directory to create downloaded files in
    /// * `policy` - Retry policy for download calls
    pub fn with_config(
        connection: Arc<Connection>,
        download_dir: PathBuf,
        policy: RetryPolicy,
    ) -> io::Result<Self> {
        fs::create_dir_all(&download_dir)?;

        info!(
            download_dir = %download_dir.display(),
            "Download cache initialized"
        );

        Ok(Self {
            connection,
            download_dir,
            policy,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Get a local path for an asset, downloading it if not cached
    ///
    /// # Arguments
    /// * `remote_id` - Remote identifier of the asset
    /// * `filename` - Asset filename (cache key and file extension)
    ///
    /// # Returns
    /// Path to a local file holding the full asset content
    pub async fn get_local_path(
        &self,
        remote_id: &str,
        filename: &str,
    ) -> Result<PathBuf, CacheError> {
        let key = DownloadKey::new(remote_id, filename);

        if let Some(local_path) = self.cached_path(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(file = filename, local = %local_path.display(), "Download cache HIT");
            return Ok(local_path);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(file = filename, remote_id = remote_id, "Download cache MISS, downloading");

        let Some(remote) = self.connection.get().await else {
            warn!(file = filename, "Cannot download, remote store not available");
            return Err(CacheError::Connection);
        };

        let (local_path, size) = retry::execute(&self.policy, "download_file", || {
            self.download_once(remote.as_ref(), &key)
        })
        .await?;

        info!(file = filename, size = size, local = %local_path.display(), "Downloaded video");
        Ok(self.register(key, local_path, size))
    }

    /// Look up a cached file, evicting the entry if its file is gone
    fn cached_path(&self, key: &DownloadKey) -> Option<PathBuf> {
        let mut entries = self.lock_entries();
        let local_path = entries.get(key)?.local_path.clone();

        if local_path.exists() {
            return Some(local_path);
        }

        debug!(
            file = %key.filename,
            local = %local_path.display(),
            "Cached file no longer exists, evicting entry"
        );
        entries.remove(key);
        None
    }

    /// Stream one asset into a fresh temporary file
    ///
    /// The file is only kept once the whole body was written; on any error the
    /// temporary file is dropped, which deletes it.
    async fn download_once(
        &self,
        remote: &dyn RemoteStore,
        key: &DownloadKey,
    ) -> Result<(PathBuf, u64), AttemptError> {
        let AssetDownload {
            content_length,
            mut body,
        } = remote.download_file(&key.remote_id).await?;

        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&temp_suffix(&key.filename))
            .tempfile_in(&self.download_dir)?;
        let mut file = tokio::fs::File::from_std(tmp.reopen()?);

        let mut written: u64 = 0;
        let mut reported_decile: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = content_length.filter(|t| *t > 0) {
                let decile = (written * 10 / total).min(10);
                if decile > reported_decile {
                    reported_decile = decile;
                    debug!(
                        file = %key.filename,
                        progress = format!("{}%", decile * 10),
                        "Download progress"
                    );
                }
            }
        }

        file.flush().await?;
        drop(file);

        let local_path = tmp.into_temp_path().keep().map_err(|e| e.error)?;
        Ok((local_path, written))
    }

    /// Record a finished download; an entry registered meanwhile by a concurrent
    /// download of the same key wins and the duplicate file is removed.
    fn register(&self, key: DownloadKey, local_path: PathBuf, size: u64) -> PathBuf {
        let mut entries = self.lock_entries();

        if let Some(existing) = entries.get(&key) {
            if existing.local_path.exists() {
                trace!(file = %key.filename, "Concurrent download already cached, discarding duplicate");
                if let Err(e) = fs::remove_file(&local_path) {
                    warn!(path = %local_path.display(), error = %e, "Failed to remove duplicate download");
                }
                return existing.local_path.clone();
            }
        }

        entries.insert(
            key,
            CacheEntry {
                local_path: local_path.clone(),
                size,
                downloaded_at: SystemTime::now(),
            },
        );
        local_path
    }

    /// Delete every downloaded file and forget all entries
    ///
    /// A file that cannot be deleted is logged and skipped.
    ///
    /// # Returns
    /// Number of files deleted
    pub fn clear(&self) -> usize {
        let drained: Vec<(DownloadKey, CacheEntry)> = self.lock_entries().drain().collect();
        let mut removed = 0;

        for (key, entry) in drained {
            match fs::remove_file(&entry.local_path) {
                Ok(()) => {
                    removed += 1;
                    debug!(
                        file = %key.filename,
                        path = %entry.local_path.display(),
                        size = entry.size,
                        age_secs = entry
                            .downloaded_at
                            .elapsed()
                            .map(|d| d.as_secs())
                            .unwrap_or_default(),
                        "Deleted cached video"
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %entry.local_path.display(), "Cached video already gone");
                }
                Err(e) => {
                    warn!(path = %entry.local_path.display(), error = %e, "Failed to delete cached video");
                }
            }
        }

        info!(removed = removed, "Download cache cleared");
        removed
    }

    /// Number of cached downloads
    pub fn entry_count(&self) -> usize {
        self.lock_entries().len()
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

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<DownloadKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Temporary file suffix for an asset filename (`.mp4` when it has no extension)
fn temp_suffix(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| DEFAULT_SUFFIX.to_string())
}
