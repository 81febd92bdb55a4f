//! Error types for the upload module.
//!
//! Every upload call resolves to at most one [`UploadError`]. Failures from
//! several attempts are folded into [`UploadError::Multiple`], which keeps the
//! per-attempt errors in the order the attempts were made.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error used as the source of network-level failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while uploading a file.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Network-level error (DNS, connection refused, reset, body stream failure, etc.)
    #[error("network error uploading to {url}: {source}")]
    Network {
        /// The destination URL.
        url: String,
        /// The underlying transport or stream error.
        #[source]
        source: BoxError,
    },

    /// The request timed out before a response arrived.
    #[error("timeout uploading to {url}")]
    Timeout {
        /// The destination URL.
        url: String,
    },

    /// The server answered with an error status (>= 400).
    #[error("HTTP {status} uploading to {url}: {message}")]
    Http {
        /// The destination URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Message taken from the JSON error body, or the status text.
        message: String,
    },

    /// More than one attempt failed; errors are kept in attempt order.
    #[error("{} errors occurred while uploading", .errors.len())]
    Multiple {
        /// Per-attempt errors, first attempt first.
        errors: Vec<UploadError>,
    },

    /// The upload was cancelled without a recorded reason.
    #[error("upload to {url} was cancelled")]
    Cancelled {
        /// The destination URL.
        url: String,
    },

    /// The stall monitor saw no data read for longer than its threshold.
    #[error("upload stalled: no data read for {}ms (threshold {}ms)", .idle.as_millis(), .threshold.as_millis())]
    Stalled {
        /// Time since the last chunk was read when the monitor fired.
        idle: Duration,
        /// Configured idle threshold.
        threshold: Duration,
    },

    /// The byte source could not be opened or inspected.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// The source file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The destination URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl UploadError {
    /// Creates a network error from any transport or stream error.
    pub fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP error response error.
    pub fn http(url: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// Creates a composite error from per-attempt errors.
    #[must_use]
    pub fn multiple(errors: Vec<UploadError>) -> Self {
        Self::Multiple { errors }
    }

    /// Creates a cancellation error with no recorded reason.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a stall error.
    #[must_use]
    pub fn stalled(idle: Duration, threshold: Duration) -> Self {
        Self::Stalled { idle, threshold }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true for connection-level failures, which are always retry-eligible.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Returns the HTTP status for [`UploadError::Http`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the per-attempt errors of a composite error.
    #[must_use]
    pub fn errors(&self) -> Option<&[UploadError]> {
        match self {
            Self::Multiple { errors } => Some(errors),
            _ => None,
        }
    }
}
