//! Daemon configuration from environment variables

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::listing::{DEFAULT_LISTING_TTL, DEFAULT_MAX_STALENESS, MAX_CACHE_DURATION};

/// Socket path for IPC communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/videocache.sock";

pub const ENV_KEY_ID: &str = "B2_KEY_ID";
pub const ENV_KEY: &str = "B2_KEY";
pub const ENV_BUCKET: &str = "B2_BUCKET";
pub const ENV_SOCKET: &str = "VIDEOCACHE_SOCKET";
pub const ENV_DOWNLOAD_DIR: &str = "VIDEOCACHE_DOWNLOAD_DIR";
pub const ENV_LISTING_TTL: &str = "VIDEOCACHE_LISTING_TTL_SECS";
pub const ENV_MAX_STALENESS: &str = "VIDEOCACHE_MAX_STALENESS_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// B2 application key and bucket
#[derive(Clone)]
pub struct B2Credentials {
    pub key_id: String,
    pub key: String,
    pub bucket_name: String,
}

impl fmt::Debug for B2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("B2Credentials")
            .field("key_id", &self.key_id)
            .field("key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .finish()
    }
}

/// Cache tuning
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Directory downloaded videos are written to
    pub download_dir: PathBuf,
    /// How long a folder listing is served without a remote call
    pub listing_ttl: Duration,
    /// Oldest listing served as a stale fallback (`None` = no limit)
    pub max_staleness: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            download_dir: env::temp_dir(),
            listing_ttl: DEFAULT_LISTING_TTL,
            max_staleness: Some(DEFAULT_MAX_STALENESS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: B2Credentials,
    pub socket_path: PathBuf,
    pub cache: CacheConfig,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value if set
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let credentials = B2Credentials {
            key_id: required(ENV_KEY_ID)?,
            key: required(ENV_KEY)?,
            bucket_name: required(ENV_BUCKET)?,
        };

        let mut cache = CacheConfig::default();
        if let Some(dir) = lookup(ENV_DOWNLOAD_DIR).filter(|v| !v.is_empty()) {
            cache.download_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_LISTING_TTL) {
            cache.listing_ttl = parse_secs(ENV_LISTING_TTL, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_STALENESS) {
            // 0 disables the cap
            cache.max_staleness = Some(parse_secs(ENV_MAX_STALENESS, &value)?)
                .filter(|cap| !cap.is_zero());
        }

        let socket_path = lookup(ENV_SOCKET)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));

        Ok(Self {
            credentials,
            socket_path,
            cache,
        })
    }
}

/// Parse a whole number of seconds no longer than [`MAX_CACHE_DURATION`]
fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    };

    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
    let duration = Duration::from_secs(secs);
    if duration > MAX_CACHE_DURATION {
        return Err(invalid(format!(
            "must be at most {} seconds",
            MAX_CACHE_DURATION.as_secs()
        )));
    }
    Ok(duration)
}
