//! Retry decisions for failed upload attempts.
//!
//! This module provides [`decide`], a pure function that maps the outcome of
//! one attempt to a [`RetryDecision`], and [`RetryPolicy`], which bundles the
//! retry budget with a [`RetryDelay`] function.
//!
//! # Rules
//!
//! - Statuses `408`, `429`, `502`, `503` and `504` are retryable; any other
//!   status >= 400 is terminal.
//! - Network-level errors (connection failures, timeouts, stream errors) are
//!   always retryable.
//! - A retry is granted only while `attempt_index < max_retries`.
//!
//! # Example
//!
//! ```
//! use uploader_core::upload::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.decide(0, None, Some(503)) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt index {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::UploadError;
use super::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_STEP, RETRYABLE_STATUSES};

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// Index of the next attempt (0-based, so the first retry is 1).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

impl RetryDecision {
    /// Returns true for [`RetryDecision::Retry`].
    #[must_use]
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Maps a failed attempt index to the wait before the next attempt.
#[derive(Clone)]
pub struct RetryDelay(Arc<dyn Fn(u32) -> Duration + Send + Sync>);

impl RetryDelay {
    /// Wraps an arbitrary delay function.
    pub fn from_fn(delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self(Arc::new(delay))
    }

    /// Geometric delay: attempt `n` waits `(n + 1) * step`.
    #[must_use]
    pub fn geometric(step: Duration) -> Self {
        Self::from_fn(move |attempt| step.saturating_mul(attempt.saturating_add(1)))
    }

    /// Same delay after every attempt.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::from_fn(move |_| delay)
    }

    /// No delay between attempts.
    #[must_use]
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Returns the wait after the attempt with the given index failed.
    #[must_use]
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        (self.0)(attempt_index)
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self::geometric(DEFAULT_RETRY_DELAY_STEP)
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDelay")
            .field("first", &self.delay_for(0))
            .finish_non_exhaustive()
    }
}

/// Retry budget plus delay function.
///
/// # Default Values
///
/// - `max_retries`: 2 (three attempts total)
/// - `delay`: geometric with a 500ms step (500ms, 1000ms, 1500ms, ...)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts after the first one.
    max_retries: u32,

    /// Wait between attempts.
    delay: RetryDelay,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: RetryDelay::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom retry budget and delay function.
    #[must_use]
    pub fn new(max_retries: u32, delay: RetryDelay) -> Self {
        Self { max_retries, delay }
    }

    /// Creates a policy with a custom retry budget and the default delay.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Returns the retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delay function.
    #[must_use]
    pub fn delay(&self) -> &RetryDelay {
        &self.delay
    }

    /// Decides whether to retry after the attempt at `attempt_index` failed.
    #[must_use]
    pub fn decide(
        &self,
        attempt_index: u32,
        network_error: Option<&UploadError>,
        status: Option<u16>,
    ) -> RetryDecision {
        decide(
            attempt_index,
            self.max_retries,
            network_error,
            status,
            &self.delay,
        )
    }
}

/// Returns true if the status is in the automatic retry set.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Decides whether to retry a failed attempt.
///
/// # Arguments
///
/// * `attempt_index` - The 0-based index of the attempt that just failed
/// * `max_retries` - Maximum number of attempts after the first
/// * `network_error` - The connection-level error, if the attempt produced one
/// * `status` - The response status, if a response arrived
/// * `delay` - Delay function applied to `attempt_index`
#[instrument(skip(network_error, delay), fields(has_network_error = network_error.is_some()))]
pub fn decide(
    attempt_index: u32,
    max_retries: u32,
    network_error: Option<&UploadError>,
    status: Option<u16>,
    delay: &RetryDelay,
) -> RetryDecision {
    let eligible = network_error.is_some() || status.is_some_and(is_retryable_status);
    if !eligible {
        return RetryDecision::DoNotRetry {
            reason: match status {
                Some(status) => format!("HTTP {status} is not retryable"),
                None => "attempt did not fail".to_string(),
            },
        };
    }

    if attempt_index >= max_retries {
        debug!(attempt_index, max_retries, "retry budget exhausted");
        return RetryDecision::DoNotRetry {
            reason: format!("retry budget ({max_retries}) exhausted"),
        };
    }

    let wait = delay.delay_for(attempt_index);
    debug!(
        attempt_index,
        next_attempt = attempt_index + 1,
        delay_ms = wait.as_millis(),
        "will retry"
    );

    RetryDecision::Retry {
        delay: wait,
        attempt: attempt_index + 1,
    }
}
