//! Per-product metadata retrieval.
//!
//! One OData round trip per product. The download engine resolves metadata
//! before every transfer because resumability depends on the server-declared
//! size and checksum; callers can also resolve standalone.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::http::HttpTransport;
use crate::response::{parse_odata_product, ProductMetadata};

/// Fallback message when the server provides nothing usable.
const SERVICE_UNAVAILABLE: &str = "Remote service is unavailable";

/// Resolves product metadata from the catalog's OData endpoint.
pub struct ProductResolver<'a> {
    transport: &'a dyn HttpTransport,
    api_url: &'a str,
}

impl<'a> ProductResolver<'a> {
    /// `api_url` must end with a slash (the client config guarantees this).
    pub fn new(transport: &'a dyn HttpTransport, api_url: &'a str) -> Self {
        Self { transport, api_url }
    }

    /// Fetch the short metadata record for a product.
    pub fn resolve(&self, id: &str) -> ClientResult<ProductMetadata> {
        self.fetch(id, false)
    }

    /// Fetch the full metadata record, including the expanded
    /// instrument-specific attribute set.
    pub fn resolve_full(&self, id: &str) -> ClientResult<ProductMetadata> {
        self.fetch(id, true)
    }

    fn fetch(&self, id: &str, full: bool) -> ClientResult<ProductMetadata> {
        let url = self.odata_url(id, full);
        debug!(id, full, "resolving product metadata");

        let response = self.transport.get(&url, None)?;
        let status = response.status;
        let html = response.is_html();
        let body = response.text()?;

        if !(200..300).contains(&status) {
            return Err(service_error(status, html, &body));
        }

        // A well-formed record is JSON; anything else (e.g. a maintenance
        // notice served with status 200) is a service-level failure whose
        // message is the body itself.
        if serde_json::from_str::<Value>(&body).is_err() {
            return Err(ClientError::RemoteService {
                status: Some(status),
                message: body,
            });
        }

        parse_odata_product(&body)
    }

    fn odata_url(&self, id: &str, full: bool) -> String {
        let mut url = format!("{}odata/v1/Products('{}')?$format=json", self.api_url, id);
        if full {
            url.push_str("&$expand=Attributes");
        }
        url
    }
}

/// Build a [`ClientError::RemoteService`] from a non-success response.
///
/// Message precedence: the JSON error payload's human-readable value, then
/// the headline of an HTML maintenance banner, then the raw body, then a
/// generic notice.
pub(crate) fn service_error(status: u16, html: bool, body: &str) -> ClientError {
    let message = json_error_message(body)
        .or_else(|| if html { banner_headline(body) } else { None })
        .or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .unwrap_or_else(|| SERVICE_UNAVAILABLE.to_string());

    ClientError::RemoteService {
        status: Some(status),
        message,
    }
}

/// Extract `error.message.value` from an application-level error payload.
fn json_error_message(body: &str) -> Option<String> {
    let root: Value = serde_json::from_str(body).ok()?;
    root.get("error")?
        .get("message")?
        .get("value")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract the `<h1>` headline from a maintenance page.
fn banner_headline(body: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)<h1>(.*?)</h1>").unwrap());
    re.captures(body)?
        .get(1)
        .map(|m| m.as_str().trim().to_string())
}
