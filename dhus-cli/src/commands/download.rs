//! Download command - fetch product archives with verification and resume.

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use dhus::{BatchOptions, CancellationToken, CatalogClient, DownloadOptions, ProgressCallback};

use super::common::ConnectionArgs;
use crate::error::CliError;

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Product ids to download
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Destination directory (must exist)
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Skip post-transfer checksum verification
    #[arg(long)]
    pub no_verify: bool,

    /// Re-download even when a verified copy already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Attempts per product before giving up
    #[arg(long, default_value_t = 10)]
    pub max_attempts: usize,

    /// Concurrent downloads
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,
}

/// Run the download command.
pub fn run(connection: &ConnectionArgs, args: &DownloadArgs) -> Result<(), CliError> {
    let client = connection.connect()?;
    let options = DownloadOptions {
        verify_checksum: !args.no_verify,
        skip_if_existing: !args.overwrite,
    };

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Interrupt received, stopping after in-flight transfers...");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    if let [id] = args.ids.as_slice() {
        download_one(&client, id, args, options, &cancel)
    } else {
        download_many(&client, args, options, &cancel)
    }
}

/// Single product: live progress bar, no retry loop.
fn download_one(
    client: &CatalogClient,
    id: &str,
    args: &DownloadArgs,
    options: DownloadOptions,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let progress_bar = bar.clone();
    let progress: ProgressCallback = Box::new(move |done, total| {
        progress_bar.set_length(total);
        progress_bar.set_position(done);
    });

    let outcome =
        client.fetch_with_progress(id, &args.output, options, Some(cancel), Some(&progress))?;
    bar.finish_and_clear();

    if outcome.downloaded_bytes == 0 {
        println!("{} already present: {}", outcome.title, outcome.path.display());
    } else {
        println!("Downloaded {} to {}", outcome.title, outcome.path.display());
    }
    Ok(())
}

/// Multiple products: batch coordinator with retries and a worker pool.
fn download_many(
    client: &CatalogClient,
    args: &DownloadArgs,
    options: DownloadOptions,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let batch = BatchOptions {
        download: options,
        max_attempts: args.max_attempts,
        concurrency: args.concurrency,
    };

    let (successes, failures) = client.fetch_all_with(&args.ids, &args.output, batch, Some(cancel))?;

    for (id, outcome) in &successes {
        println!("{}  {}", id, outcome.path.display());
    }
    for (id, error) in &failures {
        warn!(id, %error, "download failed");
        eprintln!("{}  FAILED: {}", id, error);
    }

    if failures.is_empty() {
        println!("Downloaded {} product(s)", successes.len());
        Ok(())
    } else {
        Err(CliError::Config(format!(
            "{} of {} download(s) failed",
            failures.len(),
            args.ids.len()
        )))
    }
}
