//! Checksum-verified, resumable product downloads.
//!
//! The download subsystem is layered:
//!
//! - [`checksum`](self) — streaming MD5/SHA-256 hashing and verification
//! - `state` — classification of a partially-present local file into a
//!   transfer plan (skip, resume, fresh)
//! - `engine` — single-product transfer: metadata lookup, ranged resume,
//!   post-transfer integrity verification, per-path serialization
//! - `batch` — retry loop and worker pool over many products
//!
//! A download is atomic in outcome, not in transfer: an interrupted
//! transfer leaves a partial file behind on purpose, so the next attempt
//! can resume it with a ranged request. A file that fails verification is
//! removed instead, since its bytes cannot be trusted as a resume base.

mod batch;
mod checksum;
mod engine;
mod progress;
mod state;

pub use batch::{BatchOptions, BatchResult};
pub use checksum::{compute_file_checksum, verify_file, Checksum, ChecksumAlgorithm};
pub use engine::{DownloadOptions, DownloadOutcome};
pub use progress::{CancellationToken, ProgressCallback};
pub use state::{classify, LocalFileState, TransferPlan};

pub(crate) use batch::BatchDownloader;
pub(crate) use engine::DownloadEngine;
