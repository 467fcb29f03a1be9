//! Error types for the download module.
//!
//! Structured errors for the fetch pipeline. The orchestrator's retry
//! budget only ever replays connection-level transport failures
//! ([`DownloadError::Network`] and [`DownloadError::Timeout`]); every other
//! variant is fatal for the run.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionError;
use crate::shutdown::Interrupted;

/// Errors that can occur while fetching a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection-level error (DNS resolution, connection refused or
    /// dropped mid-stream). Retryable.
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request or stream read timed out. Retryable.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with a non-success status for a derived archive
    /// URL. Fatal: the URL construction itself is suspect.
    #[error("bad resource URL {url} (HTTP {status})")]
    BadStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error during the streamed write.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The destination directory already exists and overwriting was not
    /// requested.
    #[error("destination {path} already exists; pass --overwrite to replace it")]
    DestinationExists {
        /// The pre-existing resource directory.
        path: PathBuf,
    },

    /// Authentication failure surfaced through the session client. Fatal.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The run was interrupted by the shutdown signal.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a bad-status error.
    pub fn bad_status(url: impl Into<String>, status: u16) -> Self {
        Self::BadStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a destination-exists error.
    pub fn destination_exists(path: impl Into<PathBuf>) -> Self {
        Self::DestinationExists { path: path.into() }
    }

    /// Maps a reqwest error to [`Timeout`](Self::Timeout) or
    /// [`Network`](Self::Network) with URL context.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }
}

// Note on From implementations: reqwest and IO errors require URL/path
// context the source errors do not carry, so the constructor helpers are
// the conversion surface; only context-free error types get #[from].
