//! Resilient streaming upload of archive files over HTTP PUT.
//!
//! This module uploads a single-use byte stream to a remote URL, retrying
//! transient failures and aborting when the payload stops flowing.
//!
//! # Features
//!
//! - Streaming bodies (the payload is never buffered whole)
//! - Bounded retries on network errors and 408/429/502/503/504
//! - Stall detection through a pluggable [`StallMonitor`]
//! - Error bodies read in the background and folded into one [`UploadError`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use uploader_core::upload::{IdleStallMonitor, UploadOptions, UploadRequest, Uploader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = UploadRequest::from_file(
//!     "https://store.example/bundle.tar",
//!     std::path::Path::new("bundle.tar"),
//! )
//! .await?;
//! let options = UploadOptions::new()
//!     .with_stall_monitor(Arc::new(IdleStallMonitor::new(Duration::from_secs(30))));
//! Uploader::new().upload(request, &options).await?;
//! # Ok(())
//! # }
//! ```

mod aggregate;
pub mod constants;
mod error;
mod monitor;
mod orchestrator;
mod retry;
mod source;
mod transport;

pub use aggregate::{AttemptOutcome, AttemptRecord, ErrorAggregator};
pub use constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_STEP, DEFAULT_STALL_TIMEOUT};
pub use error::{BoxError, UploadError};
pub use monitor::{CancellationController, IdleStallMonitor, StallMonitor};
pub use orchestrator::{UploadOptions, Uploader, upload};
pub use retry::{RetryDecision, RetryDelay, RetryPolicy, decide, is_retryable_status};
pub use source::{ByteStream, UploadRequest};
pub use transport::{PutRequest, ReqwestTransport, ResponseBody, Transport, TransportResponse};

// Note: no module-local Result alias. Use `Result<T, UploadError>` explicitly.
