//! Local file state for resumable downloads.
//!
//! The engine must reconcile whatever is already on disk with the
//! server-declared size and checksum before moving any bytes. That decision
//! is a small deterministic state machine kept free of I/O so every edge
//! case can be tested in isolation.

/// What the engine found at the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFileState {
    /// No file at the target path.
    Missing,
    /// A file exists but is shorter than the declared size.
    /// Holds the current length, i.e. the resume offset.
    Undersized { existing: u64 },
    /// A file exists but is longer than the declared size. A ranged
    /// request past the end would draw a 416, so the only way forward is
    /// a restart.
    Oversized,
    /// Length matches and verification was not requested.
    SizeMatchUnverified,
    /// Length matches and the checksum verified.
    Verified,
    /// Length matches but the checksum did not verify.
    ChecksumMismatch,
}

/// What the engine should do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// The local file is already acceptable; no transfer.
    Skip,
    /// Continue a partial transfer from `offset`, appending.
    Resume { offset: u64 },
    /// Start over with a truncating write. For `ChecksumMismatch` the
    /// existing file must be deleted first.
    Fresh,
}

/// Classify the local file relative to the declared size.
///
/// `checksum_ok` is the verification verdict, or `None` when verification
/// was not requested (or no checksum is available). Verification only
/// matters once the length matches; a shorter file resumes regardless.
pub fn classify(
    existing_len: Option<u64>,
    expected_len: u64,
    checksum_ok: Option<bool>,
) -> LocalFileState {
    match existing_len {
        None => LocalFileState::Missing,
        Some(len) if len < expected_len => LocalFileState::Undersized { existing: len },
        Some(len) if len > expected_len => LocalFileState::Oversized,
        Some(_) => match checksum_ok {
            None => LocalFileState::SizeMatchUnverified,
            Some(true) => LocalFileState::Verified,
            Some(false) => LocalFileState::ChecksumMismatch,
        },
    }
}

impl LocalFileState {
    /// The deterministic transition table.
    pub fn plan(&self) -> TransferPlan {
        match self {
            Self::Missing => TransferPlan::Fresh,
            Self::Undersized { existing } => TransferPlan::Resume { offset: *existing },
            Self::SizeMatchUnverified | Self::Verified => TransferPlan::Skip,
            Self::Oversized | Self::ChecksumMismatch => TransferPlan::Fresh,
        }
    }
}
