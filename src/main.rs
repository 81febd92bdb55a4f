//! CLI entry point for the uploader tool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info};
use uploader_core::{
    IdleStallMonitor, ReqwestTransport, RetryDelay, RetryPolicy, UploadError, UploadOptions,
    UploadRequest, Uploader,
};

mod app_config;
mod cli;
mod config_runtime;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, cli_sources) = config_runtime::parse_cli_with_sources();
    let loaded = app_config::load_default_file_config()?;
    let args = config_runtime::apply_config_defaults(args, &cli_sources, loaded.config.as_ref());

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, config_path = ?loaded.path, from_file = loaded.config.is_some(), "CLI arguments resolved");

    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let request = UploadRequest::from_file(args.url.clone(), &args.file)
        .await
        .with_context(|| format!("Failed to open '{}'", args.file.display()))?;
    info!(
        file = %args.file.display(),
        url = %args.url,
        bytes = request.total_bytes(),
        "Uploader starting"
    );

    let bar = progress::upload_progress_bar(!args.no_progress && !args.quiet, request.total_bytes());
    let observer = bar.clone();
    let request = request.on_chunk(move |chunk| observer.inc(chunk.len() as u64));

    let mut options = UploadOptions::new().with_retry(RetryPolicy::new(
        u32::from(args.max_retries),
        RetryDelay::geometric(Duration::from_millis(args.retry_delay)),
    ));
    if args.stall_timeout > 0 {
        options = options.with_stall_monitor(Arc::new(IdleStallMonitor::new(
            Duration::from_secs(args.stall_timeout),
        )));
    } else {
        debug!("stall detection disabled");
    }

    let transport = ReqwestTransport::new_with_timeouts(args.connect_timeout, None);
    let uploader = Uploader::with_transport(Arc::new(transport));

    match uploader.upload(request, &options).await {
        Ok(()) => {
            bar.finish_and_clear();
            info!(url = %args.url, "Upload complete");
            Ok(())
        }
        Err(err) => {
            bar.abandon();
            report_failure(&err);
            bail!("upload of '{}' to {} failed: {err}", args.file.display(), args.url)
        }
    }
}

fn report_failure(err: &UploadError) {
    match err.errors() {
        Some(errors) => {
            for (attempt, attempt_error) in errors.iter().enumerate() {
                error!(attempt, error = %attempt_error, "attempt failed");
            }
        }
        None => error!(error = %err, "upload failed"),
    }
}
