//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use uploader_core::upload::constants::CONNECT_TIMEOUT_SECS;
use uploader_core::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_STEP, DEFAULT_STALL_TIMEOUT};

/// Upload an archive to a remote endpoint with HTTP PUT.
///
/// Transient failures are retried, stalled transfers are aborted, and every
/// failed attempt is reported when the upload gives up.
#[derive(Parser, Debug, Clone)]
#[command(name = "uploader")]
#[command(author, version, about)]
pub struct Args {
    /// Archive file to upload
    pub file: PathBuf,

    /// Destination URL
    pub url: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Retry delay step in milliseconds; attempt n waits (n + 1) * step (max 60000)
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_STEP.as_millis() as u64, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_delay: u64,

    /// Abort when no bytes are read for this many seconds (0 to disable, max 3600)
    #[arg(long, default_value_t = DEFAULT_STALL_TIMEOUT.as_secs(), value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub stall_timeout: u64,

    /// HTTP connect timeout in seconds (1-3600)
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: u64,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}
