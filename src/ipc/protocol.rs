//! IPC protocol definitions for host communication
//!
//! This module defines the newline-delimited JSON protocol spoken between the
//! host application and the daemon over a Unix domain socket.

use serde::{Deserialize, Serialize};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from the host to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Resolve a video to a local file
    #[serde(rename_all = "camelCase")]
    Resolve {
        /// Folder the video is listed in
        folder_id: String,
        /// Exact filename
        filename: String,
    },
    /// List video filenames in a folder
    #[serde(rename_all = "camelCase")]
    ListFilenames {
        folder_id: String,
        /// Bypass the listing TTL
        #[serde(default)]
        refresh: bool,
    },
    /// Delete all downloaded videos
    ClearDownloadCache,
    /// Get daemon status and cache counters
    GetStatus,
}

/// Responses sent from the daemon to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Video is available locally
    #[serde(rename_all = "camelCase")]
    Resolved { path: String },
    /// Folder has no video with this name
    #[serde(rename_all = "camelCase")]
    NotFound { filename: String },
    /// Video may exist but cannot be fetched right now
    #[serde(rename_all = "camelCase")]
    Unavailable { reason: String },
    /// Folder listing
    #[serde(rename_all = "camelCase")]
    Filenames {
        folder_id: String,
        filenames: Vec<String>,
        /// Listing is past its TTL because the refresh failed
        stale: bool,
    },
    /// Success response
    #[serde(rename_all = "camelCase")]
    Success {
        /// Optional success message
        message: Option<String>,
    },
    /// Error response
    #[serde(rename_all = "camelCase")]
    Error {
        /// Error message
        error: String,
    },
    /// Status response with cache state
    #[serde(rename_all = "camelCase")]
    Status {
        /// Protocol version
        version: u32,
        /// Whether the remote store connection is up
        healthy: bool,
        cache: CacheInfo,
    },
}

/// Cache counters (for status response)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub listing_entries: u64,
    pub listing_hits: u64,
    pub listing_misses: u64,
    pub download_entries: usize,
    pub download_hits: u64,
    pub download_misses: u64,
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}
