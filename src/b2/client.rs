//! Backblaze B2 API Client
//!
//! Provides authenticated access to B2 cloud storage for folder listing and
//! file downloads. Retries are left to the caller.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use tracing::{debug, error, info};

use super::types::{
    AuthorizeAccountResponse, FileInfo, ListBucketsResponse, ListFileNamesRequest,
    ListFilesResponse,
};
use crate::config::B2Credentials;
use crate::remote::{
    AssetDownload, AssetFilter, Connector, RemoteAsset, RemoteError, RemoteStore,
};

/// B2 API base URL for authorization (v3 for nested apiInfo structure)
const B2_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v3/b2_authorize_account";

/// Timeout for JSON API calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing a TCP/TLS connection (downloads have no total timeout)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Names requested per b2_list_file_names page
const LIST_PAGE_SIZE: u32 = 1000;

/// Auth state that can be refreshed (interior mutability)
struct AuthState {
    auth_token: String,
    api_url: String,
    download_url: String,
}

/// B2 API client for making authenticated requests
#[derive(Clone)]
pub struct B2Client {
    /// HTTP client for making requests
    http_client: Client,
    /// B2 account ID
    account_id: String,
    /// Mutable auth state (refreshable on 401)
    auth_state: Arc<RwLock<AuthState>>,
    /// Stored credentials for re-authorization
    key_id: String,
    key: String,
    /// Bucket ID to operate on
    bucket_id: String,
    /// Bucket name (for display purposes)
    bucket_name: String,
}

impl B2Client {
    /// Get current auth token
    fn auth_token(&self) -> String {
        self.auth_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .auth_token
            .clone()
    }

    /// Get current API URL
    fn api_url(&self) -> String {
        self.auth_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .api_url
            .clone()
    }

    /// Get current download URL
    fn download_url(&self) -> String {
        self.auth_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .download_url
            .clone()
    }

    /// Call b2_authorize_account with an application key
    async fn authorize_account(
        http_client: &Client,
        key_id: &str,
        key: &str,
    ) -> Result<AuthorizeAccountResponse, RemoteError> {
        let credentials = format!("{}:{}", key_id, key);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        let auth_header = format!("Basic {}", encoded);

        let response = http_client
            .get(B2_AUTH_URL)
            .header("Authorization", &auth_header)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status, &body));
        }

        Ok(response.json().await?)
    }

    /// Refresh the auth token by re-authorizing with B2
    pub async fn refresh_auth(&self) -> Result<(), RemoteError> {
        info!("Refreshing B2 auth token...");

        let auth_response =
            Self::authorize_account(&self.http_client, &self.key_id, &self.key).await?;

        let mut state = self
            .auth_state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        state.auth_token = auth_response.authorization_token;
        state.api_url = auth_response.api_info.storage_api.api_url;
        state.download_url = auth_response.api_info.storage_api.download_url;

        info!("B2 auth token refreshed successfully");
        Ok(())
    }

    /// Turn a non-success response into an error.
    ///
    /// An expired token is refreshed before the error is returned, so the caller's
    /// next attempt runs with fresh credentials.
    async fn check(&self, response: Response) -> Result<Response, RemoteError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let err = RemoteError::from_status(status, &body);

        if matches!(err, RemoteError::AuthExpired) {
            if let Err(refresh_err) = self.refresh_auth().await {
                error!(error = %refresh_err, "Failed to refresh auth token");
            }
        }

        Err(err)
    }

    /// Authorize with B2 and create a new client for the specified bucket
    ///
    /// # Returns
    /// A new B2Client ready for API calls
    pub async fn authorize(credentials: &B2Credentials) -> Result<Self, RemoteError> {
        let bucket_name = credentials.bucket_name.as_str();
        info!(bucket = bucket_name, "Authorizing with B2 API...");

        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        let auth_response =
            Self::authorize_account(&http_client, &credentials.key_id, &credentials.key).await?;

        let api_url = auth_response.api_info.storage_api.api_url;
        let download_url = auth_response.api_info.storage_api.download_url;
        debug!(api_url = %api_url, download_url = %download_url, "B2 authorization successful");

        // Now look up the bucket ID
        let mut client = Self {
            http_client,
            account_id: auth_response.account_id,
            auth_state: Arc::new(RwLock::new(AuthState {
                auth_token: auth_response.authorization_token,
                api_url,
                download_url,
            })),
            key_id: credentials.key_id.clone(),
            key: credentials.key.clone(),
            bucket_id: String::new(),
            bucket_name: bucket_name.to_string(),
        };

        client.bucket_id = client.get_bucket_id(bucket_name).await?;

        info!(bucket_name = bucket_name, bucket_id = %client.bucket_id, "B2 client ready");
        Ok(client)
    }

    /// Look up bucket ID from bucket name
    async fn get_bucket_id(&self, bucket_name: &str) -> Result<String, RemoteError> {
        let url = format!("{}/b2api/v2/b2_list_buckets", self.api_url());

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", &self.auth_token())
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "accountId": self.account_id,
                "bucketName": bucket_name
            }))
            .send()
            .await?;

        let list_response: ListBucketsResponse = self.check(response).await?.json().await?;

        list_response
            .buckets
            .into_iter()
            .find(|b| b.bucket_name == bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| RemoteError::NotFound(format!("Bucket '{}'", bucket_name)))
    }

    /// List files in the bucket with optional prefix and delimiter
    ///
    /// # Arguments
    /// * `prefix` - Optional path prefix to filter results
    /// * `delimiter` - Optional delimiter for directory-style listing (usually "/")
    ///
    /// # Returns
    /// Vector of FileInfo for matching files, across all pages
    pub async fn list_file_names(
        &self,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> Result<Vec<FileInfo>, RemoteError> {
        let url = format!("{}/b2api/v2/b2_list_file_names", self.api_url());
        let mut all_files = Vec::new();
        let mut start_file_name: Option<String> = None;

        loop {
            let request = ListFileNamesRequest {
                bucket_id: self.bucket_id.clone(),
                prefix: prefix.map(String::from),
                delimiter: delimiter.map(String::from),
                max_file_count: LIST_PAGE_SIZE,
                start_file_name: start_file_name.clone(),
            };

            debug!(prefix = ?prefix, delimiter = ?delimiter, start = ?start_file_name, "Listing files from B2");

            let response = self
                .http_client
                .post(&url)
                .header("Authorization", &self.auth_token())
                .timeout(REQUEST_TIMEOUT)
                .json(&request)
                .send()
                .await?;

            let list_response: ListFilesResponse = self.check(response).await?.json().await?;

            all_files.extend(list_response.files);

            // Check for more pages
            match list_response.next_file_name {
                Some(next) => {
                    start_file_name = Some(next);
                }
                None => break,
            }
        }

        debug!(count = all_files.len(), "Listed files from B2");
        Ok(all_files)
    }

    /// Start downloading a file by its B2 file ID
    ///
    /// Returns the response once headers arrived; the body is read by the caller.
    pub async fn download_file_by_id(&self, file_id: &str) -> Result<Response, RemoteError> {
        let url = format!(
            "{}/b2api/v2/b2_download_file_by_id?fileId={}",
            self.download_url(),
            urlencoding::encode(file_id)
        );

        debug!(file_id = file_id, "Downloading file from B2");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", &self.auth_token())
            .send()
            .await?;

        self.check(response).await
    }

    /// Get the bucket ID
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// Get the bucket name
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }
}

/// B2 listing prefix for a folder identifier (`None` lists the bucket root)
fn folder_prefix(folder_id: &str) -> Option<String> {
    let trimmed = folder_id.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{}/", trimmed))
    }
}

/// Keep the downloadable entries matching `filter`, in listing order
fn select_assets(files: Vec<FileInfo>, filter: &AssetFilter) -> Vec<RemoteAsset> {
    files
        .into_iter()
        .filter(|f| f.is_downloadable())
        .filter(|f| filter.matches(f.base_name(), f.content_type.as_deref()))
        .filter_map(|f| {
            let name = f.base_name().to_string();
            f.file_id.map(|id| RemoteAsset::new(id, name))
        })
        .collect()
}

#[async_trait]
impl RemoteStore for B2Client {
    async fn list_files(
        &self,
        folder_id: &str,
        filter: &AssetFilter,
    ) -> Result<Vec<RemoteAsset>, RemoteError> {
        let prefix = folder_prefix(folder_id);
        let files = self.list_file_names(prefix.as_deref(), Some("/")).await?;
        Ok(select_assets(files, filter))
    }

    async fn download_file(&self, remote_id: &str) -> Result<AssetDownload, RemoteError> {
        let response = self.download_file_by_id(remote_id).await?;
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(RemoteError::from).boxed();

        Ok(AssetDownload {
            content_length,
            body,
        })
    }
}

/// Authorizes a [`B2Client`] on demand
pub struct B2Connector {
    credentials: B2Credentials,
}

impl B2Connector {
    pub fn new(credentials: B2Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Connector for B2Connector {
    async fn connect(&self) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        let client = B2Client::authorize(&self.credentials)
            .await
            .map_err(|e| match e {
                RemoteError::Connection(_) => e,
                other => RemoteError::Connection(other.to_string()),
            })?;
        info!(bucket = client.bucket_name(), bucket_id = client.bucket_id(), "Connected to B2");
        Ok(Arc::new(client) as Arc<dyn RemoteStore>)
    }
}
