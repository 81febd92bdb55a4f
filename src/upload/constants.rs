//! Constants for the upload module (timeouts, wire headers, retry defaults).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle threshold before an upload is considered stalled (30 seconds).
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt (3 attempts total).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Step of the default geometric retry delay: attempt `n` waits `(n + 1) * step`.
pub const DEFAULT_RETRY_DELAY_STEP: Duration = Duration::from_millis(500);

/// HTTP statuses that are retried automatically.
pub const RETRYABLE_STATUSES: [u16; 5] = [408, 429, 502, 503, 504];

/// Media type of the uploaded payload.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar";

/// Media type requested for error bodies.
pub const ACCEPT_CONTENT_TYPE: &str = "application/json";
