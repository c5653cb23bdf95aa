//! Remote Store Error Types
//!
//! Structured error handling for remote listing and download calls.
//! Maps HTTP status codes to specific error variants for logging and auth refresh decisions.

use crate::retry::Retryable;

/// Remote store error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Could not establish a connection to the remote store: {0}")]
    Connection(String),

    #[error("Authentication expired, token needs refresh")]
    AuthExpired,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Request error: {0}")]
    Request(String),
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited
                | RemoteError::Timeout
                | RemoteError::Network(_)
                | RemoteError::Server(_, _)
                | RemoteError::AuthExpired
        )
    }
}

impl RemoteError {
    /// Create a RemoteError from an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => RemoteError::AuthExpired,
            403 => RemoteError::Forbidden(body.to_string()),
            404 => RemoteError::NotFound(body.to_string()),
            408 => RemoteError::Timeout,
            429 => RemoteError::RateLimited,
            500..=599 => RemoteError::Server(status, body.to_string()),
            _ => RemoteError::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if let Some(status) = e.status() {
            RemoteError::from_status(status.as_u16(), &e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            RemoteError::Network(e.to_string())
        } else {
            RemoteError::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(RemoteError::from_status(401, ""), RemoteError::AuthExpired));
        assert!(matches!(RemoteError::from_status(404, "gone"), RemoteError::NotFound(b) if b == "gone"));
        assert!(matches!(RemoteError::from_status(429, ""), RemoteError::RateLimited));
        assert!(matches!(RemoteError::from_status(503, "busy"), RemoteError::Server(503, _)));
        assert!(matches!(RemoteError::from_status(418, "teapot"), RemoteError::Request(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Server(500, String::new()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(!RemoteError::Forbidden("no".to_string()).is_retryable());
        assert!(!RemoteError::Connection("down".to_string()).is_retryable());
    }
}
