//! Uploader Core Library
//!
//! This library streams archive files to a remote HTTP endpoint with PUT,
//! retrying transient failures, aborting stalled transfers, and folding every
//! failed attempt into one structured error.
//!
//! # Architecture
//!
//! - [`upload`] - Upload orchestration, retry policy, stall monitoring and the
//!   HTTP transport seam

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
pub mod test_support;
pub mod upload;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use upload::{
    CancellationController, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_STEP, DEFAULT_STALL_TIMEOUT,
    IdleStallMonitor, ReqwestTransport, RetryDecision, RetryDelay, RetryPolicy, StallMonitor,
    Transport, UploadError, UploadOptions, UploadRequest, Uploader, upload,
};
