//! Remote store contract
//!
//! The caches talk to the object store only through [`RemoteStore`]. The concrete
//! backend is created by a [`Connector`] and held by a [`Connection`], which the host
//! builds once and injects into the cache components.

pub mod errors;

#[cfg(test)]
pub mod fake;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::sync::OnceCell;
use tracing::{error, info};

pub use errors::RemoteError;

/// A listed asset. Identity is `remote_id`; `name` is the bare filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub remote_id: String,
    pub name: String,
}

impl RemoteAsset {
    pub fn new(remote_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            name: name.into(),
        }
    }
}

/// Query applied to a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFilter {
    /// Substring a matching content type contains
    pub content_type_contains: String,
    /// Substring a matching name contains
    pub name_contains: String,
}

impl AssetFilter {
    /// Video-typed or `.mp4`-named entries
    pub fn videos() -> Self {
        Self {
            content_type_contains: "video/".to_string(),
            name_contains: ".mp4".to_string(),
        }
    }

    pub fn matches(&self, name: &str, content_type: Option<&str>) -> bool {
        content_type.is_some_and(|ct| ct.contains(&self.content_type_contains))
            || name.contains(&self.name_contains)
    }
}

/// Body of a download in progress
pub struct AssetDownload {
    /// Total size when the remote reports it
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, RemoteError>>,
}

impl fmt::Debug for AssetDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetDownload")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Raw list and download calls against the object store.
///
/// Implementations do not retry; callers wrap each call in the retry executor.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the assets directly inside `folder_id` that match `filter`, in listing order.
    async fn list_files(
        &self,
        folder_id: &str,
        filter: &AssetFilter,
    ) -> Result<Vec<RemoteAsset>, RemoteError>;

    /// Open the byte stream of one asset.
    async fn download_file(&self, remote_id: &str) -> Result<AssetDownload, RemoteError>;
}

/// Factory establishing an authenticated [`RemoteStore`]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteStore>, RemoteError>;
}

/// Shared handle to the remote store.
///
/// Connects on first use and reuses the store for the life of the process. A failed
/// connect is not cached: the next call tries again.
pub struct Connection {
    connector: Box<dyn Connector>,
    store: OnceCell<Arc<dyn RemoteStore>>,
}

impl Connection {
    /// Create a connection that connects lazily through `connector`
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            store: OnceCell::new(),
        }
    }

    /// Get the store, connecting if needed.
    ///
    /// Returns `None` when no connection can be established; callers treat that as a
    /// normal outcome.
    pub async fn get(&self) -> Option<Arc<dyn RemoteStore>> {
        if let Some(store) = self.store.get() {
            return Some(Arc::clone(store));
        }

        match self.store.get_or_try_init(|| self.connector.connect()).await {
            Ok(store) => {
                info!("Remote store connection established");
                Some(Arc::clone(store))
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to remote store");
                None
            }
        }
    }

    /// Whether a store handle has been established
    pub fn is_connected(&self) -> bool {
        self.store.initialized()
    }
}
