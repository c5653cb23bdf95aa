//! VideoCache Daemon - local cache for videos stored in Backblaze B2
//!
//! This daemon resolves (folder, filename) pairs to downloaded local files and
//! serves those lookups to the host application over a Unix socket.

mod b2;
mod cache;
mod config;
mod ipc;
mod remote;
mod resolver;
mod retry;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use b2::B2Connector;
use config::Config;
use ipc::IpcServer;
use remote::Connection;
use resolver::{AssetResolver, Resolution};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run IPC server mode (default)
    Server,
    /// Resolve one video to a local path (CLI mode)
    Resolve { folder_id: String, filename: String },
    /// List videos in a folder (CLI mode)
    List { folder_id: String },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"VideoCache Daemon - Cache Backblaze B2 videos as local files

USAGE:
    videocache-daemon                    # Run IPC server (default)
    videocache-daemon server
    videocache-daemon resolve <folder_id> <filename>
    videocache-daemon list <folder_id>
    videocache-daemon help

COMMANDS:
    server   Run IPC server mode (waits for commands from the host)
    resolve  Download a video if needed and print its local path (CLI mode)
    list     List video filenames in a folder (CLI mode)
    help     Show this help message

EXAMPLES:
    # Run IPC server (default)
    videocache-daemon

    # Resolve a video (CLI mode for testing)
    videocache-daemon resolve sessions/pilot event_001.mp4

ENVIRONMENT:
    B2_KEY_ID                       B2 application key ID (required)
    B2_KEY                          B2 application key (required)
    B2_BUCKET                       Bucket holding the videos (required)
    VIDEOCACHE_SOCKET               IPC socket path (default /tmp/videocache.sock)
    VIDEOCACHE_DOWNLOAD_DIR         Where downloaded videos go (default: temp dir)
    VIDEOCACHE_LISTING_TTL_SECS     Folder listing freshness (default 300)
    VIDEOCACHE_MAX_STALENESS_SECS   Oldest stale listing served, 0 for no limit (default 86400)
    RUST_LOG                        Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Server);
    }

    match args[1].as_str() {
        "server" => Ok(Command::Server),
        "resolve" => {
            if args.len() < 4 {
                return Err(anyhow!(
                    "Usage: videocache-daemon resolve <folder_id> <filename>"
                ));
            }
            Ok(Command::Resolve {
                folder_id: args[2].clone(),
                filename: args[3].clone(),
            })
        }
        "list" => {
            if args.len() < 3 {
                return Err(anyhow!("Usage: videocache-daemon list <folder_id>"));
            }
            Ok(Command::List {
                folder_id: args[2].clone(),
            })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Load configuration and build the resolver around a B2 connection
async fn build_resolver() -> Result<(Config, Arc<AssetResolver>)> {
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        bucket = %config.credentials.bucket_name,
        download_dir = %config.cache.download_dir.display(),
        "Configuration loaded"
    );

    // Connect eagerly so credential problems show up at startup. A failure here
    // is not fatal; the connection is attempted again on first use.
    let connection = Connection::new(B2Connector::new(config.credentials.clone()));
    if connection.get().await.is_none() {
        warn!("Remote store not reachable yet, will retry on first request");
    }

    let resolver = AssetResolver::with_config(connection, &config.cache)
        .context("Failed to create download directory")?;
    Ok((config, Arc::new(resolver)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Server => {
            let (config, resolver) = build_resolver().await?;
            info!("Starting VideoCache daemon in IPC server mode");

            let mut ipc_server = IpcServer::new(Arc::clone(&resolver), &config.socket_path);
            if let Err(e) = ipc_server.start().await {
                error!(error = %e, "Failed to start IPC server");
                return Err(e);
            }

            info!(
                socket = %ipc_server.socket_path().display(),
                "Daemon ready. Waiting for commands from the host..."
            );

            let ipc_server = Arc::new(ipc_server);
            let running = Arc::clone(&ipc_server);
            let ipc_handle = tokio::spawn(async move {
                if let Err(e) = running.run().await {
                    error!(error = %e, "IPC server error");
                }
            });

            // Wait for Ctrl+C
            tokio::signal::ctrl_c().await?;

            info!(
                connections = ipc_server.connection_count().await,
                "Received shutdown signal, clearing video cache..."
            );
            ipc_handle.abort();
            resolver.clear_download_cache();
            ipc_server.stop()?;

            info!("Shutdown complete.");
        }
        Command::Resolve {
            folder_id,
            filename,
        } => {
            let (_, resolver) = build_resolver().await?;
            match resolver.resolve(&filename, &folder_id).await {
                Resolution::Ready(path) => println!("{}", path.display()),
                Resolution::NotFound => {
                    return Err(anyhow!("{} not found in {}", filename, folder_id));
                }
                Resolution::Unavailable(e) => {
                    return Err(anyhow!(e).context(format!("{} is unavailable", filename)));
                }
            }
        }
        Command::List { folder_id } => {
            let (_, resolver) = build_resolver().await?;
            let listing = resolver
                .list_all_filenames(&folder_id, true)
                .await
                .context("Failed to list folder")?;
            if listing.stale {
                eprintln!("Warning: listing is stale, refresh failed");
            }
            if listing.filenames.is_empty() {
                println!("No videos in {}.", folder_id);
            } else {
                for filename in &listing.filenames {
                    println!("  {}", filename);
                }
            }
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}
