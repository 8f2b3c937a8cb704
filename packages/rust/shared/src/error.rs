//! Error types for feedgraph.
//!
//! Library crates use [`FeedGraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only two failures end an ingestion run: [`FeedGraphError::Parse`] (the
//! source feed could not be fetched or parsed) and [`FeedGraphError::Publish`]
//! (the assembled document could not be written). A [`FetchError`] concerns a
//! single enclosure and is downgraded by the caller.

use std::path::PathBuf;

/// Top-level error type for all feedgraph operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedGraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// HTTP client setup or transport error outside of a single fetch.
    #[error("network error: {0}")]
    Network(String),

    /// The source feed could not be fetched or parsed.
    #[error("feed error for {url}: {message}")]
    Parse { url: String, message: String },

    /// One enclosure or image could not be fetched and stored.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Content store read or write error.
    #[error("store error: {0}")]
    Store(String),

    /// The assembled document could not be published.
    #[error("publish error: {message}")]
    Publish { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed CID, unexpected document shape, ...).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FeedGraphError>;

impl FeedGraphError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a feed parse error for the given source URL.
    pub fn parse(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a publish error from any displayable message.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to fetch and store one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to fetch {url}: {cause}")]
pub struct FetchError {
    /// The resource that could not be resolved.
    pub url: String,
    /// Human-readable cause (transport error, HTTP status, store rejection, deadline).
    pub cause: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cause: cause.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = FeedGraphError::config("missing store url");
        assert_eq!(err.to_string(), "config error: missing store url");

        let err = FeedGraphError::parse("https://example.com/feed.xml", "timed out");
        assert_eq!(
            err.to_string(),
            "feed error for https://example.com/feed.xml: timed out"
        );

        let err = FeedGraphError::publish("connection refused");
        assert!(err.to_string().starts_with("publish error"));
    }

    #[test]
    fn fetch_error_converts_transparently() {
        let fetch = FetchError::new("http://x/ep1.mp3", "HTTP 404 Not Found");
        let err: FeedGraphError = fetch.clone().into();
        assert_eq!(err.to_string(), fetch.to_string());
        assert!(err.to_string().contains("http://x/ep1.mp3"));
    }
}
