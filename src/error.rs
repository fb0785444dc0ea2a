//! Error types for the discreet-request crate.

use thiserror::Error;

/// Error returned when no healthy proxy is available in the pool.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// Failure reported by a [`Transport`](crate::transport::Transport).
///
/// Transports never raise: this error travels inside a
/// [`DispatchResult`](crate::dispatcher::DispatchResult) as plain data.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Create a transport error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        };
        Self::with_source(message, err)
    }
}

/// Errors surfaced to callers of [`DiscreetRequest`](crate::DiscreetRequest).
#[derive(Debug, Error)]
pub enum DiscreetError {
    /// The transport could not complete the call.
    #[error("Could not complete request to {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: TransportError,
    },

    /// The pool had no active proxy to route the request through.
    #[error("Could not request {url}: {source}")]
    ProxyUnavailable {
        url: String,
        #[source]
        source: NoProxyAvailable,
    },

    /// A request was made before `init()` (or after `close()`).
    #[error("Discreet requests are not initialized, call init() before requesting {url}")]
    RequestNotInitialized { url: String },

    /// A cache write was attempted without a configured store.
    #[error("No cache store is configured, cannot cache {key}")]
    CacheUnavailable { key: String },

    /// The configured store failed.
    #[error("Cache operation failed for {key}: {source}")]
    Cache {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = DiscreetError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn network_error_names_the_url() {
        let err = DiscreetError::Network {
            url: "http://example.com".to_string(),
            source: TransportError::new("connection refused"),
        };
        assert_eq!(
            err.to_string(),
            "Could not complete request to http://example.com: connection refused"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn transport_error_keeps_its_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "too slow");
        let err = TransportError::with_source("timed out", io);
        assert_eq!(err.message(), "timed out");
        assert_eq!(err.source().map(|s| s.to_string()), Some("too slow".to_string()));
    }
}
