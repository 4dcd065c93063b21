//! Error types for jusho-dl
//!
//! This module provides error handling for the library, including:
//! - Transport failures (timeout, connect, status, body) as a dedicated enum
//! - Archive and filesystem failures surfaced per acquisition unit
//! - Configuration validation errors with the offending key

use thiserror::Error;

/// Result type alias for jusho-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for jusho-dl
///
/// Each variant carries enough context to identify the acquisition unit that
/// failed. An error on one unit is recorded in its outcome and never aborts
/// the rest of a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "position_url_template")
        key: Option<String>,
    },

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {reason}")]
    Client {
        /// The underlying builder failure
        reason: String,
    },

    /// Transport failure while fetching a source
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Downloaded bytes could not be read as a ZIP archive
    #[error("corrupt archive for {label}: {reason}")]
    CorruptArchive {
        /// Label of the source whose payload failed verification
        label: String,
        /// Why the container could not be opened
        reason: String,
    },

    /// I/O error while persisting a downloaded archive
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level failure from a single fetch attempt
///
/// Produced by [`Fetcher::fetch`](crate::fetcher::Fetcher::fetch). These are
/// recoverable: a batch records the failure for the item and moves on.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request exceeded the configured timeout
    #[error("timed out after {timeout_secs}s fetching {url}")]
    Timeout {
        /// The URL that timed out
        url: String,
        /// The configured timeout in seconds
        timeout_secs: u64,
    },

    /// TCP/TLS connection could not be established
    #[error("connection failed for {url}: {reason}")]
    Connect {
        /// The URL that could not be reached
        url: String,
        /// The underlying connection failure
        reason: String,
    },

    /// Server answered with a non-success status code
    #[error("unexpected status {status} from {url}")]
    Status {
        /// The URL that returned the status
        url: String,
        /// The HTTP status code
        status: u16,
    },

    /// Response body could not be read to completion
    #[error("failed to read body from {url}: {reason}")]
    Body {
        /// The URL whose body failed mid-read
        url: String,
        /// The underlying read failure
        reason: String,
    },
}

impl FetchError {
    /// The URL the failed request was addressed to
    pub fn url(&self) -> &str {
        match self {
            FetchError::Timeout { url, .. }
            | FetchError::Connect { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Body { url, .. } => url,
        }
    }
}
