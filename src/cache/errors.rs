//! Cache failure reasons

use crate::retry::RetriesExhausted;

/// Why a cache could not produce a result
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No remote store connection could be established
    #[error("remote store is not connected")]
    Connection,

    /// Every attempt of the remote call failed
    #[error(transparent)]
    Exhausted(#[from] RetriesExhausted),

    /// A local file could not be created, written or removed
    #[error("local I/O failed: {0}")]
    LocalIo(#[from] std::io::Error),
}
