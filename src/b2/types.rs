//! B2 API types
//!
//! Defines types for Backblaze B2 API requests and responses.

use serde::{Deserialize, Serialize};

/// B2 file/folder information from API responses
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Full file path within the bucket
    pub file_name: String,
    /// Action type: "upload", "folder", "hide", "start"
    pub action: String,
    /// Optional file ID (null for folder entries)
    #[serde(default)]
    pub file_id: Option<String>,
    /// Content type (MIME type, null for folder entries)
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FileInfo {
    /// Check if this entry represents a directory
    pub fn is_directory(&self) -> bool {
        self.action == "folder" || self.file_name.ends_with('/')
    }

    /// Whether this entry is a finished, downloadable upload
    pub fn is_downloadable(&self) -> bool {
        self.action == "upload" && !self.is_directory() && self.file_id.is_some()
    }

    /// Get the base name (last component of path)
    pub fn base_name(&self) -> &str {
        let name = self.file_name.trim_end_matches('/');
        name.rsplit('/').next().unwrap_or(name)
    }
}

/// Request body for b2_list_file_names API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFileNamesRequest {
    pub bucket_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    pub max_file_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_file_name: Option<String>,
}

/// Response from b2_list_file_names API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    /// List of files in the response
    pub files: Vec<FileInfo>,
    /// Next file name for pagination (None if no more files)
    pub next_file_name: Option<String>,
}

/// Response from b2_authorize_account API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeAccountResponse {
    pub account_id: String,
    pub authorization_token: String,
    pub api_info: ApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    pub storage_api: StorageApiInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageApiInfo {
    pub api_url: String,
    pub download_url: String,
}

/// Response from b2_list_buckets API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBucketsResponse {
    pub buckets: Vec<BucketInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub bucket_id: String,
    pub bucket_name: String,
}
