//! HTTP transport abstraction for testability.
//!
//! The catalog client performs three kinds of requests: form POSTs to the
//! search endpoint, metadata GETs, and (optionally ranged) archive GETs.
//! `HttpTransport` captures exactly that surface so tests can substitute an
//! in-memory transport and no module below this one touches the network
//! directly.

use std::io::Read;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Default timeout for catalog requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// A response delivered by the transport.
///
/// The body is a streaming reader so archive downloads never need to hold a
/// full product in memory.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Value of the `Content-Type` header, if present.
    pub content_type: Option<String>,
    /// Response body stream.
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// Whether the status is a 2xx success.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body declares an HTML content type.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("text/html"))
            .unwrap_or(false)
    }

    /// Drain the body into a string, replacing invalid UTF-8.
    pub fn text(mut self) -> ClientResult<String> {
        let mut buf = Vec::new();
        self.body
            .read_to_end(&mut buf)
            .map_err(|e| ClientError::Http(format!("failed to read response body: {}", e)))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Trait for HTTP operations against the catalog.
///
/// Implementations must be shareable across download workers.
pub trait HttpTransport: Send + Sync {
    /// Performs a GET request.
    ///
    /// When `range_offset` is `Some(n)`, a `Range: bytes=n-` header is sent
    /// to resume an interrupted transfer.
    fn get(&self, url: &str, range_offset: Option<u64>) -> ClientResult<HttpResponse>;

    /// Performs a form-encoded POST request.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> ClientResult<HttpResponse>;
}

/// Real transport backed by a blocking reqwest client.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with the default timeout.
    pub fn new(credentials: Option<(String, String)>) -> ClientResult<Self> {
        Self::with_timeout(credentials, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    ///
    /// The timeout applies to every request issued through this transport
    /// and is reported in [`ClientError::Timeout`] when exceeded.
    pub fn with_timeout(
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            timeout,
        })
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            ClientError::Http(format!("request to {} failed: {}", url, e))
        }
    }

    fn into_response(response: reqwest::blocking::Response) -> HttpResponse {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        HttpResponse {
            status,
            content_type,
            body: Box::new(response),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, range_offset: Option<u64>) -> ClientResult<HttpResponse> {
        let mut request = self.authorize(self.client.get(url));
        if let Some(offset) = range_offset {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().map_err(|e| self.map_send_error(url, e))?;
        Ok(Self::into_response(response))
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> ClientResult<HttpResponse> {
        let request = self.authorize(self.client.post(url)).form(form);
        let response = request.send().map_err(|e| self.map_send_error(url, e))?;
        Ok(Self::into_response(response))
    }
}
