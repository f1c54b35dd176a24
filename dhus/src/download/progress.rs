//! Transfer progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback invoked as a transfer advances.
///
/// Arguments are `(bytes_on_disk, expected_total)`, so a resumed transfer
/// starts reporting from its resume offset rather than zero.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Cooperative cancellation flag shared between a caller and in-flight
/// downloads.
///
/// Cancellation is checked between streamed chunks and between batch
/// attempts, never mid-write, so an interrupted file is always left in a
/// resumable state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
