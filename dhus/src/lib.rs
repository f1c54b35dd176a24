//! dhus - Client library for Data Hub System catalog services
//!
//! This library talks to DHuS-style satellite product catalogs (Copernicus
//! SciHub and compatible deployments): structured search queries, paginated
//! result listings, per-product OData metadata, and checksum-verified,
//! resumable archive downloads.

pub mod client;
pub mod download;
pub mod error;
pub mod http;
pub mod query;
pub mod resolver;
pub mod response;

pub use client::{CatalogClient, ClientConfig, DEFAULT_API_URL};
pub use download::{
    BatchOptions, BatchResult, CancellationToken, Checksum, ChecksumAlgorithm, DownloadOptions,
    DownloadOutcome, ProgressCallback,
};
pub use error::{ClientError, ClientResult};
pub use query::SearchQuery;
pub use response::{AttributeValue, ProductList, ProductMetadata, SearchPage};
