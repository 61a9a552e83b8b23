// src/error.rs

//! Unified error handling for the crawler.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Gerrit answered with a non-success status or the connection failed
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Gerrit answered with a body that is not valid JSON
    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    /// A single file diff could not be downloaded
    #[error("Failed to fetch {path} of change {change}: {message}")]
    FileFetch {
        change: u64,
        path: String,
        message: String,
    },

    /// A sink failed to check or persist a change
    #[error("Store '{store}' failed: {message}")]
    StoreWrite { store: String, message: String },

    /// The worker pool no longer accepts tasks
    #[error("Worker pool is closed")]
    PoolClosed,

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a transport error for a request URL.
    pub fn transport(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error for a request URL.
    pub fn parse(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a file fetch error.
    pub fn file_fetch(change: u64, path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::FileFetch {
            change,
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error attributed to the named sink.
    pub fn store(store: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::StoreWrite {
            store: store.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether a page request that failed with this error may be retried.
    ///
    /// Only transport failures qualify; a malformed response stops the crawl.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Http(_))
    }
}
