//! Response normalization.
//!
//! The catalog speaks two payload shapes: the OpenSearch JSON listing
//! returned by the search endpoint and the OData record returned by the
//! per-product metadata endpoint (in a short form and a `$expand=Attributes`
//! full form). This module turns all of them into [`ProductMetadata`].
//!
//! The full form exposes an open, instrument-specific attribute set (radar
//! products carry different keys than optical ones), so extension
//! attributes live in a dynamically keyed map of tagged values rather than
//! a fixed record type.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::warn;

use crate::download::{Checksum, ChecksumAlgorithm};
use crate::error::{ClientError, ClientResult};

/// Fixed diagnostic for syntactically invalid payloads.
const INVALID_RESPONSE: &str = "Invalid API response.";

/// A single typed attribute value.
///
/// Conversion is driven by the type tag the server attaches to the value
/// (the OpenSearch group name, or the literal shape of an OData value),
/// never by the attribute name.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Timestamp(DateTime<Utc>),
}

/// Normalized metadata for one catalog product.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductMetadata {
    /// Opaque unique identifier, stable across search and metadata
    /// endpoints. Never empty.
    pub id: String,
    /// Human-readable product name; derives the local filename.
    pub title: String,
    /// Archive size in bytes. Only the metadata endpoint declares it.
    pub size: Option<u64>,
    /// Expected content hash, when the server declares one.
    pub checksum: Option<Checksum>,
    /// Sensing start timestamp.
    pub date: Option<DateTime<Utc>>,
    /// Product footprint as a WKT polygon.
    pub footprint: Option<String>,
    /// Archive download URL.
    pub url: Option<String>,
    /// Open, server-defined attribute set (full metadata only for OData;
    /// all typed attributes for search entries).
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Insertion-ordered collection of products keyed by id.
///
/// Preserves the server's result ordering while giving O(1) lookup by id.
#[derive(Debug, Default, Clone)]
pub struct ProductList {
    products: Vec<ProductMetadata>,
    index: HashMap<String, usize>,
}

impl ProductList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a product. A product with an already-present id replaces the
    /// earlier entry in place, keeping ids unique.
    pub fn push(&mut self, product: ProductMetadata) {
        match self.index.get(&product.id) {
            Some(&pos) => self.products[pos] = product,
            None => {
                self.index.insert(product.id.clone(), self.products.len());
                self.products.push(product);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProductMetadata> {
        self.index.get(id).map(|&pos| &self.products[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Product ids in server order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.products.iter().map(|p| p.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProductMetadata> {
        self.products.iter()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Merge another page of results, preserving order.
    pub fn extend(&mut self, other: ProductList) {
        for product in other.products {
            self.push(product);
        }
    }

    /// Total declared size of all products in gigabytes, rounded to two
    /// decimals. Search entries declare sizes as human-readable strings
    /// ("223.88 MB", "5.50 GB").
    pub fn total_size_gb(&self) -> f64 {
        let total: f64 = self
            .products
            .iter()
            .filter_map(|p| match p.attributes.get("size") {
                Some(AttributeValue::Text(s)) => parse_size_gb(s),
                _ => None,
            })
            .sum();
        (total * 100.0).round() / 100.0
    }
}

impl IntoIterator for ProductList {
    type Item = ProductMetadata;
    type IntoIter = std::vec::IntoIter<ProductMetadata>;

    fn into_iter(self) -> Self::IntoIter {
        self.products.into_iter()
    }
}

/// One page of search results.
#[derive(Debug)]
pub struct SearchPage {
    pub products: ProductList,
    /// Value of `opensearch:totalResults`, used to drive pagination.
    pub total_results: u64,
}

fn parse_size_gb(text: &str) -> Option<f64> {
    let mut parts = text.split_whitespace();
    let number: f64 = parts.next()?.parse().ok()?;
    match parts.next()? {
        "GB" => Some(number),
        "MB" => Some(number / 1024.0),
        "KB" => Some(number / (1024.0 * 1024.0)),
        _ => None,
    }
}

fn invalid_response(body: &str) -> ClientError {
    ClientError::Parse {
        message: INVALID_RESPONSE.to_string(),
        body: body.to_string(),
    }
}

/// Parse the catalog's decorated epoch-milliseconds timestamp,
/// e.g. `/Date(1445588544652)/`.
pub fn parse_decorated_timestamp(value: &str) -> Option<DateTime<Utc>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^/Date\((-?\d+)\)/$").unwrap());

    let millis: i64 = re.captures(value)?.get(1)?.as_str().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse an ISO-8601 timestamp, with or without a timezone designator.
fn parse_iso_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Convert a GML polygon to WKT.
///
/// GML coordinates come as whitespace-separated `lat,lon` pairs; WKT wants
/// `lon lat` with comma-separated vertices.
fn gml_to_wkt(gml: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)<gml:coordinates>(.*?)</gml:coordinates>").unwrap()
    });

    let coordinates = re.captures(gml)?.get(1)?.as_str();
    let vertices: Vec<String> = coordinates
        .split_whitespace()
        .filter_map(|pair| {
            let (lat, lon) = pair.split_once(',')?;
            Some(format!("{} {}", lon, lat))
        })
        .collect();

    if vertices.is_empty() {
        return None;
    }
    Some(format!("POLYGON(({}))", vertices.join(",")))
}

/// Parse a raw search-result payload into an ordered product listing.
///
/// This is the search-side entry point of the normalizer; the query layer
/// hands it each page's raw body.
pub fn load_search_results(body: &str) -> ClientResult<ProductList> {
    Ok(parse_search_response(body)?.products)
}

/// Parse a raw search-result payload, including the pagination total.
pub fn parse_search_response(body: &str) -> ClientResult<SearchPage> {
    let root: Value = serde_json::from_str(body).map_err(|_| invalid_response(body))?;
    let feed = root.get("feed").ok_or_else(|| invalid_response(body))?;

    let total_results = feed
        .get("opensearch:totalResults")
        .and_then(value_as_u64)
        .unwrap_or(0);

    let mut products = ProductList::new();
    if let Some(entries) = feed.get("entry") {
        for entry in as_group(entries) {
            products.push(parse_search_entry(entry).map_err(|_| invalid_response(body))?);
        }
    }

    Ok(SearchPage {
        products,
        total_results,
    })
}

/// OpenSearch collapses single-element arrays into bare objects; normalize
/// both forms to a slice-like view.
fn as_group(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_search_entry(entry: &Value) -> ClientResult<ProductMetadata> {
    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_response("missing entry id"))?
        .to_string();
    let title = entry
        .get("title")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_response("missing entry title"))?
        .to_string();

    // The unadorned link (no rel) points at the archive.
    let url = entry
        .get("link")
        .map(as_group)
        .unwrap_or_default()
        .into_iter()
        .find(|link| link.get("rel").is_none())
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let mut attributes = BTreeMap::new();
    let mut date = None;
    let mut footprint = None;

    for tag in ["str", "int", "double", "date"] {
        let Some(values) = entry.get(tag) else {
            continue;
        };
        for item in as_group(values) {
            let Some(name) = item.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(content) = item.get("content").and_then(Value::as_str) else {
                continue;
            };
            let Some(converted) = convert_tagged(tag, content) else {
                warn!(name, tag, "skipping unconvertible search attribute");
                continue;
            };

            match (name, &converted) {
                ("beginposition", AttributeValue::Timestamp(ts)) => date = Some(*ts),
                ("footprint", AttributeValue::Text(wkt)) => footprint = Some(wkt.clone()),
                _ => {}
            }
            attributes.insert(name.to_string(), converted);
        }
    }

    Ok(ProductMetadata {
        id,
        title,
        size: None,
        checksum: None,
        date,
        footprint,
        url,
        attributes,
    })
}

/// Convert an OpenSearch attribute by its group tag.
fn convert_tagged(tag: &str, content: &str) -> Option<AttributeValue> {
    match tag {
        "str" => Some(AttributeValue::Text(content.to_string())),
        "int" => content.parse().ok().map(AttributeValue::Integer),
        "double" => content.parse().ok().map(AttributeValue::Decimal),
        "date" => parse_iso_timestamp(content).map(AttributeValue::Timestamp),
        _ => None,
    }
}

/// Parse a per-product OData payload (short or full form).
///
/// Both forms populate the shared fields identically; the full form
/// additionally carries the expanded attribute set.
pub fn parse_odata_product(body: &str) -> ClientResult<ProductMetadata> {
    let root: Value = serde_json::from_str(body).map_err(|_| invalid_response(body))?;
    let record = root.get("d").ok_or_else(|| invalid_response(body))?;

    let id = record
        .get("Id")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_response(body))?
        .to_string();
    let title = record
        .get("Name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_response(body))?
        .to_string();

    let size = record.get("ContentLength").and_then(value_as_u64);

    let checksum = record.get("Checksum").and_then(|c| {
        let tag = c.get("Algorithm").and_then(Value::as_str)?;
        let value = c.get("Value").and_then(Value::as_str)?;
        match ChecksumAlgorithm::from_tag(tag) {
            Some(algorithm) => Some(Checksum::new(algorithm, value)),
            None => {
                warn!(algorithm = tag, "server declared an unsupported checksum algorithm");
                None
            }
        }
    });

    let date = record
        .get("ContentDate")
        .and_then(|d| d.get("Start"))
        .and_then(Value::as_str)
        .and_then(parse_decorated_timestamp);

    let footprint = record
        .get("ContentGeometry")
        .and_then(Value::as_str)
        .and_then(gml_to_wkt);

    let url = record
        .get("__metadata")
        .and_then(|m| m.get("media_src"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let mut attributes = BTreeMap::new();
    if let Some(results) = record
        .get("Attributes")
        .and_then(|a| a.get("results"))
        .and_then(Value::as_array)
    {
        for attr in results {
            let Some(name) = attr.get("Name").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = attr.get("Value") else {
                continue;
            };
            attributes.insert(name.to_string(), convert_odata_value(value));
        }
    }

    Ok(ProductMetadata {
        id,
        title,
        size,
        checksum,
        date,
        footprint,
        url,
        attributes,
    })
}

/// Convert an OData attribute value by its literal shape: decorated
/// timestamps, then integers, then floats, then ISO timestamps, with text
/// as the fallback.
fn convert_odata_value(value: &Value) -> AttributeValue {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttributeValue::Integer(i)
            } else {
                AttributeValue::Decimal(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => {
            if let Some(ts) = parse_decorated_timestamp(s) {
                AttributeValue::Timestamp(ts)
            } else if let Ok(i) = s.parse::<i64>() {
                AttributeValue::Integer(i)
            } else if let Ok(d) = s.parse::<f64>() {
                AttributeValue::Decimal(d)
            } else if let Some(ts) = parse_iso_timestamp(s) {
                AttributeValue::Timestamp(ts)
            } else {
                AttributeValue::Text(s.clone())
            }
        }
        other => AttributeValue::Text(other.to_string()),
    }
}
