//! Batch downloads with per-item failure isolation.
//!
//! The coordinator drives the single-product engine over a collection of
//! ids, retrying each item up to a bounded attempt count and aggregating
//! results into two disjoint maps: id to outcome for successes, id to the
//! last error observed for failures. A per-item failure never fails the
//! batch; only whole-batch conditions (bad destination, cancellation) do.

use std::collections::HashMap;
use std::path::Path;
use std::thread;

use tracing::{info, warn};

use super::engine::{DownloadEngine, DownloadOptions, DownloadOutcome};
use super::progress::CancellationToken;
use crate::error::{ClientError, ClientResult};

/// Default attempt limit per product.
const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Default worker pool size. The service caps concurrent connections per
/// account, so the pool stays small by default.
const DEFAULT_CONCURRENCY: usize = 2;

/// Options for a batch download.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Per-item download options.
    pub download: DownloadOptions,
    /// Attempts per product before recording it as failed (minimum 1;
    /// 1 means no retry).
    pub max_attempts: usize,
    /// Worker pool size. 1 selects sequential processing.
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            download: DownloadOptions::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Success and failure maps for one batch call.
///
/// The key sets are disjoint and together cover the requested ids exactly.
pub type BatchResult = (
    HashMap<String, DownloadOutcome>,
    HashMap<String, ClientError>,
);

/// Drives the download engine over a collection of product ids.
pub(crate) struct BatchDownloader {
    engine: DownloadEngine,
}

impl BatchDownloader {
    pub fn new(engine: DownloadEngine) -> Self {
        Self { engine }
    }

    /// Download every id into `destination`.
    ///
    /// Processing follows input order; with a worker pool, completion order
    /// may differ. Fails as a whole only for an invalid destination or
    /// cancellation — per-item errors land in the failure map.
    pub fn fetch_all(
        &self,
        ids: &[String],
        destination: &Path,
        options: BatchOptions,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<BatchResult> {
        if !destination.is_dir() {
            return Err(ClientError::InvalidDestination {
                path: destination.to_path_buf(),
            });
        }

        let result = if options.concurrency <= 1 {
            self.run_sequential(ids, destination, options, cancel)
        } else {
            self.run_pooled(ids, destination, options, cancel)
        }?;

        info!(
            requested = ids.len(),
            succeeded = result.0.len(),
            failed = result.1.len(),
            "batch download finished"
        );
        Ok(result)
    }

    fn run_sequential(
        &self,
        ids: &[String],
        destination: &Path,
        options: BatchOptions,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<BatchResult> {
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();

        for id in ids {
            match attempt_product(&self.engine, id, destination, &options, cancel) {
                Ok(outcome) => {
                    successes.insert(id.clone(), outcome);
                }
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(e) => {
                    failures.insert(id.clone(), e);
                }
            }
        }

        Ok((successes, failures))
    }

    fn run_pooled(
        &self,
        ids: &[String],
        destination: &Path,
        options: BatchOptions,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<BatchResult> {
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();

        for chunk in ids.chunks(options.concurrency) {
            let handles: Vec<_> = chunk
                .iter()
                .map(|id| {
                    let engine = self.engine.clone();
                    let id = id.clone();
                    let destination = destination.to_path_buf();
                    let cancel = cancel.cloned();
                    thread::spawn(move || {
                        let result = attempt_product(
                            &engine,
                            &id,
                            &destination,
                            &options,
                            cancel.as_ref(),
                        );
                        (id, result)
                    })
                })
                .collect();

            let mut cancelled = false;
            for handle in handles {
                let (id, result) = handle
                    .join()
                    .map_err(|_| ClientError::Http("download worker panicked".to_string()))?;
                match result {
                    Ok(outcome) => {
                        successes.insert(id, outcome);
                    }
                    Err(ClientError::Cancelled) => cancelled = true,
                    Err(e) => {
                        failures.insert(id, e);
                    }
                }
            }

            // Stop issuing new chunks once cancellation is observed;
            // in-flight items of this chunk have already settled.
            if cancelled || cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
                return Err(ClientError::Cancelled);
            }
        }

        Ok((successes, failures))
    }
}

/// Run one product through the bounded retry loop.
///
/// Any error is retryable up to the attempt limit; only the last error is
/// kept. Errors from earlier attempts are logged and discarded — the
/// failure map's contract is last-error-wins.
fn attempt_product(
    engine: &DownloadEngine,
    id: &str,
    destination: &Path,
    options: &BatchOptions,
    cancel: Option<&CancellationToken>,
) -> Result<DownloadOutcome, ClientError> {
    let max_attempts = options.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
            return Err(ClientError::Cancelled);
        }

        match engine.fetch(id, destination, options.download, cancel, None) {
            Ok(outcome) => return Ok(outcome),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(id, attempt, max_attempts, error = %e, "download attempt failed");
                last_error = Some(e);
            }
        }
    }

    // max_attempts >= 1, so at least one attempt recorded an error.
    Err(last_error.unwrap_or(ClientError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{MockResponse, MockTransport};
    use crate::http::{HttpResponse, HttpTransport};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const API: &str = "https://scihub.test/apihub/";

    struct Fixture {
        mock: Arc<MockTransport>,
        downloader: BatchDownloader,
    }

    impl Fixture {
        fn new() -> Self {
            let mock = Arc::new(MockTransport::new());
            let engine = DownloadEngine::new(mock.clone(), API);
            Self {
                mock,
                downloader: BatchDownloader::new(engine),
            }
        }

        fn metadata_url(&self, id: &str) -> String {
            format!("{}odata/v1/Products('{}')?$format=json", API, id)
        }

        fn archive_url(&self, id: &str) -> String {
            format!("{}odata/v1/Products('{}')/$value", API, id)
        }

        /// Register a product whose archive body is `content`, declaring
        /// `md5` as its checksum.
        fn add_product(&self, id: &str, content: &[u8], md5: &str) {
            let body = serde_json::json!({"d": {
                "Id": id,
                "Name": format!("PRODUCT_{}", id),
                "ContentLength": content.len().to_string(),
                "Checksum": {"Algorithm": "MD5", "Value": md5},
                "__metadata": {"media_src": self.archive_url(id)}
            }})
            .to_string();
            self.mock.respond(&self.metadata_url(id), MockResponse::ok(body));
            self.mock
                .respond(&self.archive_url(id), MockResponse::binary(content.to_vec()));
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // MD5 of b"payload"
    const PAYLOAD_MD5: &str = "321c3cf486ed509164edec1e1981fec8";

    fn sequential_options(max_attempts: usize) -> BatchOptions {
        BatchOptions {
            max_attempts,
            concurrency: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_succeed() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        for id in ["a", "b", "c"] {
            fixture.add_product(id, b"payload", PAYLOAD_MD5);
        }

        let (successes, failures) = fixture
            .downloader
            .fetch_all(&ids(&["a", "b", "c"]), temp.path(), sequential_options(1), None)
            .unwrap();

        assert_eq!(successes.len(), 3);
        assert!(failures.is_empty());
        for (id, outcome) in &successes {
            assert_eq!(&outcome.id, id);
            assert!(outcome.path.exists());
            assert_eq!(outcome.downloaded_bytes, 7);
        }
    }

    #[test]
    fn test_checksum_mismatch_isolated_to_one_failure() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        fixture.add_product("a", b"payload", PAYLOAD_MD5);
        // Remote checksum deliberately wrong for "b".
        fixture.add_product("b", b"payload", &"0".repeat(32));
        fixture.add_product("c", b"payload", PAYLOAD_MD5);

        let (successes, failures) = fixture
            .downloader
            .fetch_all(&ids(&["a", "b", "c"]), temp.path(), sequential_options(1), None)
            .unwrap();

        assert_eq!(successes.len(), 2);
        assert_eq!(failures.len(), 1);
        assert!(successes.contains_key("a"));
        assert!(successes.contains_key("c"));
        assert!(!successes.contains_key("b"));
        assert!(matches!(
            failures.get("b"),
            Some(ClientError::Integrity { .. })
        ));
        // The corrupt artifact was deleted.
        assert!(!temp.path().join("PRODUCT_b.zip").exists());
    }

    #[test]
    fn test_retry_succeeds_on_second_attempt() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        // First metadata request fails, second succeeds.
        fixture.mock.respond(
            &fixture.metadata_url("a"),
            MockResponse::ok("down").with_status(503).with_content_type("text/plain"),
        );
        fixture.add_product("a", b"payload", PAYLOAD_MD5);

        let (successes, failures) = fixture
            .downloader
            .fetch_all(&ids(&["a"]), temp.path(), sequential_options(2), None)
            .unwrap();

        assert_eq!(successes.len(), 1);
        assert!(failures.is_empty());
        assert_eq!(fixture.mock.hits(&fixture.metadata_url("a")), 2);
    }

    /// Transport whose first request times out; later requests delegate.
    struct TimeoutOnce {
        inner: Arc<MockTransport>,
        tripped: AtomicBool,
    }

    impl TimeoutOnce {
        fn new(inner: Arc<MockTransport>) -> Self {
            Self {
                inner,
                tripped: AtomicBool::new(false),
            }
        }

        fn timeout(&self, url: &str) -> Option<ClientError> {
            if self.tripped.swap(true, Ordering::SeqCst) {
                return None;
            }
            Some(ClientError::Timeout {
                url: url.to_string(),
                timeout_secs: 1,
            })
        }
    }

    impl HttpTransport for TimeoutOnce {
        fn get(&self, url: &str, range_offset: Option<u64>) -> ClientResult<HttpResponse> {
            match self.timeout(url) {
                Some(e) => Err(e),
                None => self.inner.get(url, range_offset),
            }
        }

        fn post_form(&self, url: &str, form: &[(&str, &str)]) -> ClientResult<HttpResponse> {
            match self.timeout(url) {
                Some(e) => Err(e),
                None => self.inner.post_form(url, form),
            }
        }
    }

    #[test]
    fn test_timeout_is_retried_like_any_failure() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        fixture.add_product("a", b"payload", PAYLOAD_MD5);
        let engine = DownloadEngine::new(
            Arc::new(TimeoutOnce::new(fixture.mock.clone())),
            API,
        );
        let downloader = BatchDownloader::new(engine);

        // A single attempt surfaces the timeout as the item's failure.
        let (successes, failures) = downloader
            .fetch_all(&ids(&["a"]), temp.path(), sequential_options(1), None)
            .unwrap();
        assert!(successes.is_empty());
        assert!(matches!(
            failures.get("a"),
            Some(ClientError::Timeout { .. })
        ));

        // A second attempt gets past it.
        let engine = DownloadEngine::new(
            Arc::new(TimeoutOnce::new(fixture.mock.clone())),
            API,
        );
        let (successes, failures) = BatchDownloader::new(engine)
            .fetch_all(&ids(&["a"]), temp.path(), sequential_options(2), None)
            .unwrap();
        assert!(failures.is_empty());
        assert!(successes.contains_key("a"));
    }

    #[test]
    fn test_last_error_wins_on_exhaustion() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        fixture.mock.respond(
            &fixture.metadata_url("a"),
            MockResponse::ok("first failure").with_status(503).with_content_type("text/plain"),
        );
        fixture.mock.respond(
            &fixture.metadata_url("a"),
            MockResponse::ok("second failure").with_status(502).with_content_type("text/plain"),
        );

        let (successes, failures) = fixture
            .downloader
            .fetch_all(&ids(&["a"]), temp.path(), sequential_options(2), None)
            .unwrap();

        assert!(successes.is_empty());
        match failures.get("a") {
            Some(ClientError::RemoteService { status, message }) => {
                assert_eq!(*status, Some(502));
                assert_eq!(message, "second failure");
            }
            other => panic!("expected the second error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_destination_fails_whole_batch() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        fixture.add_product("a", b"payload", PAYLOAD_MD5);

        let result = fixture.downloader.fetch_all(
            &ids(&["a"]),
            &temp.path().join("missing"),
            sequential_options(1),
            None,
        );

        assert!(matches!(
            result,
            Err(ClientError::InvalidDestination { .. })
        ));
        assert!(fixture.mock.requests().is_empty());
    }

    #[test]
    fn test_pre_cancelled_batch_fails_as_a_whole() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        fixture.add_product("a", b"payload", PAYLOAD_MD5);
        let token = CancellationToken::new();
        token.cancel();

        let result = fixture.downloader.fetch_all(
            &ids(&["a"]),
            temp.path(),
            sequential_options(1),
            Some(&token),
        );

        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[test]
    fn test_pooled_execution_accounts_for_every_id() {
        let temp = TempDir::new().unwrap();
        let fixture = Fixture::new();
        fixture.add_product("a", b"payload", PAYLOAD_MD5);
        fixture.add_product("b", b"payload", &"0".repeat(32));
        fixture.add_product("c", b"payload", PAYLOAD_MD5);
        fixture.add_product("d", b"payload", PAYLOAD_MD5);

        let options = BatchOptions {
            max_attempts: 1,
            concurrency: 2,
            ..Default::default()
        };
        let (successes, failures) = fixture
            .downloader
            .fetch_all(&ids(&["a", "b", "c", "d"]), temp.path(), options, None)
            .unwrap();

        assert_eq!(successes.len() + failures.len(), 4);
        assert_eq!(failures.len(), 1);
        assert!(failures.contains_key("b"));
        for id in ["a", "c", "d"] {
            assert!(successes.contains_key(id));
            assert!(!failures.contains_key(id));
        }
    }
}
