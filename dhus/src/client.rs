//! High-level catalog client.
//!
//! `CatalogClient` ties the building blocks together behind one handle:
//! query translation, paginated search, metadata resolution, and
//! checksum-verified downloads all run through the same configured
//! transport. Construction with a mock transport is supported for tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::download::{
    BatchDownloader, BatchOptions, BatchResult, CancellationToken, DownloadEngine,
    DownloadOptions, DownloadOutcome, ProgressCallback,
};
use crate::error::ClientResult;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::query::{search_url, SearchQuery};
use crate::resolver::{service_error, ProductResolver};
use crate::response::{parse_search_response, ProductList, ProductMetadata};

/// The public Copernicus access point.
pub const DEFAULT_API_URL: &str = "https://scihub.copernicus.eu/apihub/";

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONCURRENCY: usize = 2;

/// Connection and behavior settings for [`CatalogClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    api_url: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
    page_size: usize,
    concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            credentials: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service base URL. A missing trailing slash is added so
    /// endpoint paths can be appended verbatim.
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = if api_url.ends_with('/') {
            api_url.to_string()
        } else {
            format!("{}/", api_url)
        };
        self
    }

    /// Set HTTP basic-auth credentials.
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of results requested per search page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the batch download worker pool size.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// Handle to one catalog service.
pub struct CatalogClient {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
    engine: DownloadEngine,
}

impl CatalogClient {
    /// Connect to the service described by `config`.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let transport =
            ReqwestTransport::with_timeout(config.credentials.clone(), config.timeout)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Build a client on an externally supplied transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, config: ClientConfig) -> Self {
        let engine = DownloadEngine::new(transport.clone(), config.api_url.clone());
        Self {
            transport,
            config,
            engine,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run a structured query and collect every matching product.
    pub fn query(&self, query: &SearchQuery) -> ClientResult<ProductList> {
        self.query_raw(&query.build())
    }

    /// Run a raw full-text query string, following pagination until the
    /// reported result total is reached.
    ///
    /// Products arrive in the service's order; duplicate ids across pages
    /// collapse onto the first occurrence's position.
    pub fn query_raw(&self, query: &str) -> ClientResult<ProductList> {
        let mut products = ProductList::new();
        let mut start = 0;

        loop {
            let url = search_url(&self.config.api_url, self.config.page_size, start);
            debug!(url, start, "search request");

            let response = self.transport.post_form(&url, &[("q", query)])?;
            if !response.is_success() {
                let status = response.status;
                let html = response.is_html();
                return Err(service_error(status, html, &response.text()?));
            }

            let page = parse_search_response(&response.text()?)?;
            let fetched = page.products.len();
            let total = page.total_results;
            products.extend(page.products);

            if fetched == 0 || products.len() as u64 >= total {
                info!(results = products.len(), query, "search finished");
                return Ok(products);
            }
            start += fetched;
        }
    }

    /// Fetch the OData metadata record for one product.
    pub fn resolve(&self, id: &str) -> ClientResult<ProductMetadata> {
        self.resolver().resolve(id)
    }

    /// Fetch the OData metadata record with the expanded attribute set.
    pub fn resolve_full(&self, id: &str) -> ClientResult<ProductMetadata> {
        self.resolver().resolve_full(id)
    }

    /// Download one product archive into `destination`.
    pub fn fetch(
        &self,
        id: &str,
        destination: &Path,
        options: DownloadOptions,
    ) -> ClientResult<DownloadOutcome> {
        self.engine.fetch(id, destination, options, None, None)
    }

    /// Download one product with cancellation and progress reporting.
    pub fn fetch_with_progress(
        &self,
        id: &str,
        destination: &Path,
        options: DownloadOptions,
        cancel: Option<&CancellationToken>,
        progress: Option<&ProgressCallback>,
    ) -> ClientResult<DownloadOutcome> {
        self.engine.fetch(id, destination, options, cancel, progress)
    }

    /// Download many products, with the configured concurrency and the
    /// default retry policy.
    pub fn fetch_all(
        &self,
        ids: &[String],
        destination: &Path,
        options: DownloadOptions,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<BatchResult> {
        let batch = BatchOptions {
            download: options,
            concurrency: self.config.concurrency,
            ..Default::default()
        };
        self.fetch_all_with(ids, destination, batch, cancel)
    }

    /// Download many products with full control over the batch policy.
    pub fn fetch_all_with(
        &self,
        ids: &[String],
        destination: &Path,
        options: BatchOptions,
        cancel: Option<&CancellationToken>,
    ) -> ClientResult<BatchResult> {
        BatchDownloader::new(self.engine.clone()).fetch_all(ids, destination, options, cancel)
    }

    fn resolver(&self) -> ProductResolver<'_> {
        ProductResolver::new(self.transport.as_ref(), &self.config.api_url)
    }
}
