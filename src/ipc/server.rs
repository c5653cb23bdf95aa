//! IPC Server - Unix socket server for host communication
//!
//! Handles incoming connections from the host application and dispatches
//! commands to the AssetResolver.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::ipc::protocol::{
    parse_command, serialize_response, CacheInfo, Command, Response, PROTOCOL_VERSION,
};
use crate::resolver::{AssetResolver, FolderFilenames, Resolution};

/// IPC Server that listens for commands from the host
pub struct IpcServer {
    /// Resolver shared by all connections
    resolver: Arc<AssetResolver>,
    /// Path of the Unix socket
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(resolver: Arc<AssetResolver>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            socket_path: socket_path.into(),
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        // Create the socket listener
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind Unix socket {:?}", self.socket_path))?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let resolver = Arc::clone(&self.resolver);
                    let connection_count = Arc::clone(&self.connection_count);

                    // Spawn a new task to handle this connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, resolver, connection_count).await
                        {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> u32 {
        *self.connection_count.read().await
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    resolver: Arc<AssetResolver>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()> {
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read commands line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &resolver).await,
                    Err(e) => {
                        error!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

/// Process a command and return a response
async fn process_command(command: Command, resolver: &AssetResolver) -> Response {
    match command {
        Command::Resolve {
            folder_id,
            filename,
        } => {
            info!(folder = %folder_id, file = %filename, "Processing resolve command");

            match resolver.resolve(&filename, &folder_id).await {
                Resolution::Ready(path) => Response::Resolved {
                    path: path.to_string_lossy().to_string(),
                },
                Resolution::NotFound => Response::NotFound { filename },
                Resolution::Unavailable(e) => Response::Unavailable {
                    reason: e.to_string(),
                },
            }
        }

        Command::ListFilenames { folder_id, refresh } => {
            debug!(folder = %folder_id, refresh = refresh, "Processing listFilenames command");

            match resolver.list_all_filenames(&folder_id, !refresh).await {
                Ok(FolderFilenames { filenames, stale }) => Response::Filenames {
                    folder_id,
                    filenames,
                    stale,
                },
                Err(e) => Response::Unavailable {
                    reason: e.to_string(),
                },
            }
        }

        Command::ClearDownloadCache => {
            info!("Processing clearDownloadCache command");

            let removed = resolver.clear_download_cache();
            Response::Success {
                message: Some(format!("Deleted {} cached videos", removed)),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");

            let status = resolver.status();
            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: status.connected,
                cache: CacheInfo {
                    listing_entries: status.listing_entries,
                    listing_hits: status.listing_hits,
                    listing_misses: status.listing_misses,
                    download_entries: status.download_entries,
                    download_hits: status.download_hits,
                    download_misses: status.download_misses,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DownloadCache, ListingCache};
    use crate::remote::fake::{connected, FakeStore};
    use crate::remote::RemoteAsset;
    use crate::retry::RetryPolicy;
    use tempfile::TempDir;

    const FOLDER: &str = "sessions/pilot";

    fn setup() -> (Arc<FakeStore>, Arc<AssetResolver>, TempDir) {
        let store = Arc::new(FakeStore::new());
        store.set_listing(FOLDER, vec![RemoteAsset::new("id-1", "event_001.mp4")]);
        store.set_content("id-1", b"video bytes");

        let dir = tempfile::tempdir().unwrap();
        let connection = connected(&store);
        let listings = ListingCache::new(Arc::clone(&connection));
        let downloads = DownloadCache::with_config(
            Arc::clone(&connection),
            dir.path().join("downloads"),
            RetryPolicy::DOWNLOAD,
        )
        .unwrap();

        let resolver = Arc::new(AssetResolver::new(connection, listings, downloads));
        (store, resolver, dir)
    }

    #[tokio::test]
    async fn test_process_resolve_and_not_found() {
        let (_store, resolver, _dir) = setup();

        let response = process_command(
            Command::Resolve {
                folder_id: FOLDER.to_string(),
                filename: "event_001.mp4".to_string(),
            },
            &resolver,
        )
        .await;
        match response {
            Response::Resolved { path } => {
                assert_eq!(std::fs::read(path).unwrap(), b"video bytes");
            }
            other => panic!("Expected Resolved, got {:?}", other),
        }

        let response = process_command(
            Command::Resolve {
                folder_id: FOLDER.to_string(),
                filename: "missing.mp4".to_string(),
            },
            &resolver,
        )
        .await;
        assert!(matches!(response, Response::NotFound { filename } if filename == "missing.mp4"));
    }

    #[tokio::test]
    async fn test_process_list_clear_and_status() {
        let (store, resolver, _dir) = setup();

        let response = process_command(
            Command::ListFilenames {
                folder_id: FOLDER.to_string(),
                refresh: false,
            },
            &resolver,
        )
        .await;
        assert!(matches!(
            response,
            Response::Filenames { ref filenames, stale: false, .. } if filenames == &vec!["event_001.mp4".to_string()]
        ));

        resolver.resolve("event_001.mp4", FOLDER).await;
        let response = process_command(Command::ClearDownloadCache, &resolver).await;
        assert!(matches!(response, Response::Success { .. }));

        let response = process_command(Command::GetStatus, &resolver).await;
        match response {
            Response::Status { healthy, cache, .. } => {
                assert!(healthy);
                assert_eq!(cache.download_entries, 0);
                assert_eq!(cache.listing_entries, 1);
            }
            other => panic!("Expected Status, got {:?}", other),
        }
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let (_store, resolver, dir) = setup();
        let socket_path = dir.path().join("videocache.sock");

        let mut server = IpcServer::new(resolver, &socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.run().await });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Malformed input gets an error but keeps the connection open
        writer.write_all(b"{bogus}\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains(r#""type":"error""#));

        writer
            .write_all(b"{\"type\":\"listFilenames\",\"folderId\":\"sessions/pilot\"}\n")
            .await
            .unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains("event_001.mp4"));
        assert_eq!(server.connection_count().await, 1);

        task.abort();
        server.stop().unwrap();
        assert!(!socket_path.exists());
    }
}
