//! Error types for the catalog client.

use std::io;
use std::path::PathBuf;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to a DHuS catalog or writing
/// downloaded archives to disk.
#[derive(Debug)]
pub enum ClientError {
    /// The remote payload was not well-formed structured data.
    ///
    /// Carries the raw response body for diagnostics.
    Parse { message: String, body: String },

    /// Non-success HTTP status or an application-level error payload.
    ///
    /// The message is the server-provided error text when one could be
    /// extracted, otherwise the raw response body or a generic notice.
    RemoteService {
        status: Option<u16>,
        message: String,
    },

    /// A network operation exceeded its deadline.
    Timeout { url: String, timeout_secs: u64 },

    /// Checksum verification failed after a completed transfer.
    ///
    /// The corrupt file has already been removed. `downloaded_bytes` reports
    /// the bytes transferred by the failed call.
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
        downloaded_bytes: u64,
    },

    /// Failed to read a local file.
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a local file.
    WriteFailed { path: PathBuf, source: io::Error },

    /// The destination directory does not exist or is not a directory.
    ///
    /// Directories are never created implicitly; the caller owns their
    /// lifecycle.
    InvalidDestination { path: PathBuf },

    /// Transport-level HTTP failure other than a timeout.
    Http(String),

    /// A query date expression was rejected.
    InvalidQuery(String),

    /// The operation was cancelled cooperatively.
    Cancelled,
}

impl ClientError {
    /// Whether the batch coordinator may retry the operation.
    ///
    /// Every per-item failure is retryable up to the attempt limit except
    /// cancellation, which aborts the batch as a whole.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { message, .. } => write!(f, "{}", message),
            Self::RemoteService { status, message } => match status {
                Some(code) => write!(f, "HTTP {}: {}", code, message),
                None => write!(f, "{}", message),
            },
            Self::Timeout { url, timeout_secs } => {
                write!(f, "request to {} timed out after {}s", url, timeout_secs)
            }
            Self::Integrity {
                path,
                expected,
                actual,
                ..
            } => {
                write!(
                    f,
                    "checksum mismatch for {}: expected {}, got {}",
                    path.display(),
                    expected,
                    actual
                )
            }
            Self::ReadFailed { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            Self::WriteFailed { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            Self::InvalidDestination { path } => {
                write!(f, "destination directory {} does not exist", path.display())
            }
            Self::Http(msg) => write!(f, "HTTP error: {}", msg),
            Self::InvalidQuery(msg) => write!(f, "invalid query: {}", msg),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFailed { source, .. } => Some(source),
            Self::WriteFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_remote_service_display_with_status() {
        let err = ClientError::RemoteService {
            status: Some(503),
            message: "SciHub is down".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: SciHub is down");
    }

    #[test]
    fn test_integrity_display() {
        let err = ClientError::Integrity {
            path: Path::new("/tmp/product.zip").to_path_buf(),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
            downloaded_bytes: 10,
        };
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(err.to_string().contains("abc123"));
        assert!(err.to_string().contains("def456"));
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!ClientError::Cancelled.is_retryable());
        assert!(ClientError::Http("reset".to_string()).is_retryable());
    }
}
