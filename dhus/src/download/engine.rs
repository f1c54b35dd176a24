//! Single-product resumable download.
//!
//! The engine resolves a product's metadata, reconciles the local file with
//! the server-declared size and checksum via the state machine in
//! [`super::state`], and then either skips, resumes, or restarts the
//! transfer. Writes stream through a bounded buffer; the full archive never
//! resides in memory.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use tracing::{debug, info, warn};

use super::checksum::{compute_file_checksum, verify_file, Checksum};
use super::progress::{CancellationToken, ProgressCallback};
use super::state::{classify, LocalFileState, TransferPlan};
use crate::error::{ClientError, ClientResult};
use crate::http::HttpTransport;
use crate::resolver::{service_error, ProductResolver};
use crate::response::ProductMetadata;

/// Buffer size for streaming archive bytes to disk (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Extension appended to the product title to form the local filename.
const ARCHIVE_EXTENSION: &str = "zip";

/// Options for a single download.
#[derive(Debug, Clone, Copy)]
pub struct DownloadOptions {
    /// Verify the file's content hash against the server-declared checksum,
    /// both when deciding whether an existing file is complete and after a
    /// transfer finishes.
    pub verify_checksum: bool,
    /// Reuse or resume an existing file at the target path. When false, any
    /// existing file is overwritten by a fresh transfer.
    pub skip_if_existing: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            skip_if_existing: true,
        }
    }
}

/// Result of one download call.
///
/// Created fresh on every call and never persisted; callers wanting history
/// must retain these themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Product id the outcome belongs to.
    pub id: String,
    /// Local location of the archive.
    pub path: PathBuf,
    /// Product title, copied from metadata.
    pub title: String,
    /// Archive size in bytes, as declared by the server.
    pub size: u64,
    /// Bytes actually transferred by this call. Zero when the existing
    /// local file was already acceptable.
    pub downloaded_bytes: u64,
}

/// Serializes downloads per destination path.
///
/// Two concurrent workers must never write the same file; interleaved
/// appends would corrupt a resumed transfer.
#[derive(Default)]
pub(crate) struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, path: &Path) -> ArcMutexGuard<RawMutex, ()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_arc()
    }
}

/// Checksum- and size-aware resumable downloader for single products.
#[derive(Clone)]
pub(crate) struct DownloadEngine {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    locks: Arc<PathLocks>,
}

impl DownloadEngine {
    pub fn new(transport: Arc<dyn HttpTransport>, api_url: impl Into<String>) -> Self {
        Self {
            transport,
            api_url: api_url.into(),
            locks: Arc::new(PathLocks::new()),
        }
    }

    /// Download one product archive into `destination`.
    pub fn fetch(
        &self,
        id: &str,
        destination: &Path,
        options: DownloadOptions,
        cancel: Option<&CancellationToken>,
        progress: Option<&ProgressCallback>,
    ) -> ClientResult<DownloadOutcome> {
        if !destination.is_dir() {
            return Err(ClientError::InvalidDestination {
                path: destination.to_path_buf(),
            });
        }

        let resolver = ProductResolver::new(self.transport.as_ref(), &self.api_url);
        let product = resolver.resolve(id)?;

        let size = product.size.ok_or_else(|| ClientError::RemoteService {
            status: None,
            message: format!("product {} metadata does not declare a size", id),
        })?;
        let url = archive_url(&product, &self.api_url, id);
        let target = destination.join(format!("{}.{}", product.title, ARCHIVE_EXTENSION));

        // Serialize on the target path for the rest of the call.
        let _guard = self.locks.acquire(&target);

        let state = self.assess_local_file(&target, size, &options, product.checksum.as_ref())?;
        debug!(id, ?state, "local file assessed");

        if state == LocalFileState::ChecksumMismatch {
            info!(path = %target.display(), "existing file failed verification, restarting");
            remove_target(&target)?;
        }

        let plan = state.plan();
        let downloaded_bytes = match plan {
            TransferPlan::Skip => {
                info!(id, path = %target.display(), "already downloaded");
                0
            }
            TransferPlan::Fresh => self.transfer(&url, &target, size, 0, cancel, progress)?,
            TransferPlan::Resume { offset } => {
                info!(id, offset, "resuming partial download");
                self.transfer(&url, &target, size, offset, cancel, progress)?
            }
        };

        // A skipped file was already assessed; anything transferred gets a
        // final verification, zero-length products included.
        if plan != TransferPlan::Skip && options.verify_checksum {
            self.verify_transfer(&target, product.checksum.as_ref(), downloaded_bytes)?;
        }

        Ok(DownloadOutcome {
            id: id.to_string(),
            path: target,
            title: product.title,
            size,
            downloaded_bytes,
        })
    }

    /// Classify the file currently at the target path.
    fn assess_local_file(
        &self,
        target: &Path,
        expected_size: u64,
        options: &DownloadOptions,
        checksum: Option<&Checksum>,
    ) -> ClientResult<LocalFileState> {
        if !options.skip_if_existing {
            // Caller asked for a fresh transfer regardless of local state.
            return Ok(LocalFileState::Missing);
        }

        let existing_len = match fs::metadata(target) {
            Ok(meta) => Some(meta.len()),
            Err(_) => None,
        };

        // Verification is only worth the read when the length matches.
        let checksum_ok = match (existing_len, options.verify_checksum, checksum) {
            (Some(len), true, Some(expected)) if len == expected_size => {
                Some(verify_file(target, expected)?)
            }
            _ => None,
        };

        Ok(classify(existing_len, expected_size, checksum_ok))
    }

    /// Stream the archive body to disk, appending from `offset`.
    ///
    /// Returns the bytes written by this call.
    fn transfer(
        &self,
        url: &str,
        target: &Path,
        expected_size: u64,
        offset: u64,
        cancel: Option<&CancellationToken>,
        progress: Option<&ProgressCallback>,
    ) -> ClientResult<u64> {
        let range = if offset > 0 { Some(offset) } else { None };
        let response = self.transport.get(url, range)?;

        if !response.is_success() {
            let status = response.status;
            let html = response.is_html();
            let body = response.text().unwrap_or_default();
            return Err(service_error(status, html, &body));
        }

        let file = if offset > 0 {
            OpenOptions::new()
                .append(true)
                .open(target)
                .map_err(|e| ClientError::WriteFailed {
                    path: target.to_path_buf(),
                    source: e,
                })?
        } else {
            File::create(target).map_err(|e| ClientError::WriteFailed {
                path: target.to_path_buf(),
                source: e,
            })?
        };

        let mut body = response.body;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded: u64 = 0;

        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    // Flush what we have; the partial file stays resumable.
                    writer.flush().map_err(|e| ClientError::WriteFailed {
                        path: target.to_path_buf(),
                        source: e,
                    })?;
                    return Err(ClientError::Cancelled);
                }
            }

            let bytes_read = body
                .read(&mut buffer)
                .map_err(|e| ClientError::Http(format!("read error from {}: {}", url, e)))?;
            if bytes_read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..bytes_read])
                .map_err(|e| ClientError::WriteFailed {
                    path: target.to_path_buf(),
                    source: e,
                })?;

            downloaded += bytes_read as u64;
            if let Some(cb) = progress {
                cb(offset + downloaded, expected_size);
            }
        }

        writer.flush().map_err(|e| ClientError::WriteFailed {
            path: target.to_path_buf(),
            source: e,
        })?;

        Ok(downloaded)
    }

    /// Verify a completed transfer, deleting the file on mismatch.
    fn verify_transfer(
        &self,
        target: &Path,
        checksum: Option<&Checksum>,
        downloaded_bytes: u64,
    ) -> ClientResult<()> {
        let Some(expected) = checksum else {
            warn!(path = %target.display(), "no server checksum available, skipping verification");
            return Ok(());
        };

        let actual = compute_file_checksum(target, expected.algorithm)?;
        if actual.eq_ignore_ascii_case(&expected.value) {
            return Ok(());
        }

        // Do not leave a corrupt artifact on disk.
        remove_target(target)?;
        Err(ClientError::Integrity {
            path: target.to_path_buf(),
            expected: expected.value.clone(),
            actual,
            downloaded_bytes,
        })
    }
}

/// The archive endpoint, preferring the media link the server declared.
fn archive_url(product: &ProductMetadata, api_url: &str, id: &str) -> String {
    product
        .url
        .clone()
        .unwrap_or_else(|| format!("{}odata/v1/Products('{}')/$value", api_url, id))
}

fn remove_target(target: &Path) -> ClientResult<()> {
    fs::remove_file(target).map_err(|e| ClientError::WriteFailed {
        path: target.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::checksum::ChecksumAlgorithm;
    use crate::http::tests::{MockResponse, MockTransport};
    use tempfile::TempDir;

    const API: &str = "https://scihub.test/apihub/";
    const ID: &str = "1f62a176-c980-41dc-b3a1-c735d660c910";
    const TITLE: &str = "S1A_WV_OCN__2SSH_20150603T092625";
    const CONTENT: &[u8] = b"satellite archive payload; definitely a zip";
    // MD5 of CONTENT, uppercase as the server reports it.
    const CONTENT_MD5: &str = "DCC91FFD4BB3C5990D88930D72482D74";

    fn metadata_url() -> String {
        format!("{}odata/v1/Products('{}')?$format=json", API, ID)
    }

    fn archive_url() -> String {
        format!("{}odata/v1/Products('{}')/$value", API, ID)
    }

    fn metadata_body(md5: &str) -> String {
        serde_json::json!({"d": {
            "Id": ID,
            "Name": TITLE,
            "ContentLength": CONTENT.len().to_string(),
            "Checksum": {"Algorithm": "MD5", "Value": md5},
            "__metadata": {"media_src": archive_url()}
        }})
        .to_string()
    }

    fn engine_with_server(md5: &str) -> (DownloadEngine, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new());
        mock.respond(&metadata_url(), MockResponse::ok(metadata_body(md5)));
        mock.respond(&archive_url(), MockResponse::binary(CONTENT.to_vec()));
        let engine = DownloadEngine::new(mock.clone(), API);
        (engine, mock)
    }

    fn target_path(dir: &TempDir) -> PathBuf {
        dir.path().join(format!("{}.zip", TITLE))
    }

    #[test]
    fn test_md5_constant_matches_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("probe.bin");
        std::fs::write(&path, CONTENT).unwrap();
        let actual = compute_file_checksum(&path, ChecksumAlgorithm::Md5).unwrap();
        assert!(actual.eq_ignore_ascii_case(CONTENT_MD5));
    }

    #[test]
    fn test_fresh_download() {
        let temp = TempDir::new().unwrap();
        let (engine, _mock) = engine_with_server(CONTENT_MD5);

        let outcome = engine
            .fetch(ID, temp.path(), DownloadOptions::default(), None, None)
            .unwrap();

        assert_eq!(outcome.id, ID);
        assert_eq!(outcome.title, TITLE);
        assert_eq!(outcome.path, target_path(&temp));
        assert_eq!(outcome.size, CONTENT.len() as u64);
        assert_eq!(outcome.downloaded_bytes, CONTENT.len() as u64);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), CONTENT);
    }

    #[test]
    fn test_existing_valid_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (engine, mock) = engine_with_server(CONTENT_MD5);
        std::fs::write(target_path(&temp), CONTENT).unwrap();

        let outcome = engine
            .fetch(ID, temp.path(), DownloadOptions::default(), None, None)
            .unwrap();

        assert_eq!(outcome.downloaded_bytes, 0);
        // Metadata was resolved but the archive endpoint was never hit.
        assert_eq!(mock.hits(&archive_url()), 0);
    }

    #[test]
    fn test_truncated_file_resumes_and_restores_hash() {
        let temp = TempDir::new().unwrap();
        let (engine, mock) = engine_with_server(CONTENT_MD5);
        let truncated = &CONTENT[..CONTENT.len() - 1];
        std::fs::write(target_path(&temp), truncated).unwrap();

        let outcome = engine
            .fetch(ID, temp.path(), DownloadOptions::default(), None, None)
            .unwrap();

        assert_eq!(outcome.downloaded_bytes, 1);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), CONTENT);
        assert_eq!(mock.hits(&archive_url()), 1);
    }

    #[test]
    fn test_oversized_file_restarts_instead_of_resuming() {
        let temp = TempDir::new().unwrap();
        let (engine, mock) = engine_with_server(CONTENT_MD5);
        // Longer than the declared size; a range request past the end
        // could never converge.
        let mut bloated = CONTENT.to_vec();
        bloated.extend_from_slice(b"trailing junk");
        std::fs::write(target_path(&temp), &bloated).unwrap();

        let outcome = engine
            .fetch(ID, temp.path(), DownloadOptions::default(), None, None)
            .unwrap();

        assert_eq!(outcome.downloaded_bytes, CONTENT.len() as u64);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), CONTENT);
        assert_eq!(mock.hits(&archive_url()), 1);
    }

    #[test]
    fn test_correct_size_wrong_content_without_verification_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (engine, mock) = engine_with_server(CONTENT_MD5);
        let corrupt = vec![b'a'; CONTENT.len()];
        std::fs::write(target_path(&temp), &corrupt).unwrap();

        let options = DownloadOptions {
            verify_checksum: false,
            ..Default::default()
        };
        let outcome = engine.fetch(ID, temp.path(), options, None, None).unwrap();

        // Corruption is only detected when verification is requested.
        assert_eq!(outcome.downloaded_bytes, 0);
        assert_eq!(mock.hits(&archive_url()), 0);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), corrupt);
    }

    #[test]
    fn test_corrupt_full_size_file_with_verification_redownloads() {
        let temp = TempDir::new().unwrap();
        let (engine, _mock) = engine_with_server(CONTENT_MD5);
        std::fs::write(target_path(&temp), vec![b'a'; CONTENT.len()]).unwrap();

        let outcome = engine
            .fetch(ID, temp.path(), DownloadOptions::default(), None, None)
            .unwrap();

        assert_eq!(outcome.downloaded_bytes, CONTENT.len() as u64);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), CONTENT);
    }

    #[test]
    fn test_skip_if_existing_false_forces_fresh_download() {
        let temp = TempDir::new().unwrap();
        let (engine, mock) = engine_with_server(CONTENT_MD5);
        std::fs::write(target_path(&temp), vec![b'a'; CONTENT.len()]).unwrap();

        let options = DownloadOptions {
            skip_if_existing: false,
            ..Default::default()
        };
        let outcome = engine.fetch(ID, temp.path(), options, None, None).unwrap();

        assert_eq!(outcome.downloaded_bytes, CONTENT.len() as u64);
        assert_eq!(std::fs::read(&outcome.path).unwrap(), CONTENT);
        assert_eq!(mock.hits(&archive_url()), 1);
    }

    #[test]
    fn test_integrity_failure_removes_file_and_reports_bytes() {
        let temp = TempDir::new().unwrap();
        // Server declares a checksum the payload cannot match.
        let (engine, _mock) = engine_with_server(&"0".repeat(32));

        let result = engine.fetch(ID, temp.path(), DownloadOptions::default(), None, None);

        match result {
            Err(ClientError::Integrity {
                path,
                downloaded_bytes,
                ..
            }) => {
                assert_eq!(path, target_path(&temp));
                assert_eq!(downloaded_bytes, CONTENT.len() as u64);
                assert!(!path.exists());
            }
            other => panic!("expected Integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_destination_directory_is_an_error() {
        let temp = TempDir::new().unwrap();
        let (engine, mock) = engine_with_server(CONTENT_MD5);
        let missing = temp.path().join("does-not-exist");

        let result = engine.fetch(ID, &missing, DownloadOptions::default(), None, None);

        assert!(matches!(
            result,
            Err(ClientError::InvalidDestination { .. })
        ));
        // Nothing was requested; the caller owns directory lifecycle.
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_cancelled_token_leaves_no_partial_write_started() {
        let temp = TempDir::new().unwrap();
        let (engine, _mock) = engine_with_server(CONTENT_MD5);
        let token = CancellationToken::new();
        token.cancel();

        let result = engine.fetch(
            ID,
            temp.path(),
            DownloadOptions::default(),
            Some(&token),
            None,
        );

        assert!(matches!(result, Err(ClientError::Cancelled)));
        // Cancellation hit before the first chunk; the file is empty and
        // will resume from zero.
        let len = std::fs::metadata(target_path(&temp)).map(|m| m.len()).unwrap_or(0);
        assert_eq!(len, 0);
    }

    #[test]
    fn test_progress_reports_absolute_position() {
        let temp = TempDir::new().unwrap();
        let (engine, _mock) = engine_with_server(CONTENT_MD5);

        let reported = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = reported.clone();
        let progress: ProgressCallback = Box::new(move |position, total| {
            sink.lock().push((position, total));
        });

        engine
            .fetch(
                ID,
                temp.path(),
                DownloadOptions::default(),
                None,
                Some(&progress),
            )
            .unwrap();

        let reports = reported.lock();
        let (position, total) = *reports.last().unwrap();
        assert_eq!(position, CONTENT.len() as u64);
        assert_eq!(total, CONTENT.len() as u64);
    }
}
