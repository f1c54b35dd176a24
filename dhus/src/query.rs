//! Search query construction.
//!
//! The catalog's search endpoint takes a single full-text query string in
//! the solr style, e.g.
//!
//! ```text
//! (beginPosition:[2015-01-01T00:00:00Z TO NOW]) AND (footprint:"Intersects(POLYGON((...)))")
//! ```
//!
//! This module normalizes the date forms callers commonly have (calendar
//! timestamps, `YYYYMMDD` strings, server-relative `NOW-1DAY` expressions)
//! and assembles the clause string. It performs no I/O.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ClientError, ClientResult};

/// Server-relative date expressions accepted verbatim, e.g. `NOW-1DAY` or
/// `NOW-20MINUTES`. Whitespace and `NOW+` offsets are rejected.
fn relative_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^NOW(?:-\d+(?:MONTH|DAY|HOUR|MINUTE)S?)?$").unwrap())
}

/// Format a calendar timestamp in the catalog's query date format.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Normalize a query date string.
///
/// Accepted forms:
/// - `NOW`, `NOW-1DAY`, `NOW-20MINUTES`, ... (passed through verbatim)
/// - `YYYYMMDD`
/// - ISO-8601 timestamps, with or without fractional seconds
///
/// Anything else fails with [`ClientError::InvalidQuery`].
pub fn normalize_query_date(input: &str) -> ClientResult<String> {
    if relative_date_re().is_match(input) {
        return Ok(input.to_string());
    }

    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y%m%d") {
        let dt = date.and_hms_opt(0, 0, 0).unwrap();
        return Ok(format_date(DateTime::from_naive_utc_and_offset(dt, Utc)));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(format_date(dt.with_timezone(&Utc)));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(format_date(DateTime::from_naive_utc_and_offset(dt, Utc)));
    }

    Err(ClientError::InvalidQuery(format!(
        "unsupported date value: {}",
        input
    )))
}

/// Builder for a catalog search query.
///
/// By default the query covers the last 24 hours with no spatial predicate,
/// matching the service's own conventions.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    area: Option<String>,
    begin: Option<String>,
    end: Option<String>,
    filters: Vec<(String, String)>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchQuery {
    /// Create a query over the last 24 hours.
    pub fn new() -> Self {
        Self {
            area: None,
            begin: Some("NOW-1DAY".to_string()),
            end: Some("NOW".to_string()),
            filters: Vec::new(),
        }
    }

    /// Restrict results to products intersecting a WKT geometry.
    pub fn area(mut self, wkt: &str) -> Self {
        self.area = Some(wkt.to_string());
        self
    }

    /// Set the sensing date range. Inputs are normalized per
    /// [`normalize_query_date`].
    pub fn date_range(mut self, begin: &str, end: &str) -> ClientResult<Self> {
        self.begin = Some(normalize_query_date(begin)?);
        self.end = Some(normalize_query_date(end)?);
        Ok(self)
    }

    /// Drop the date clause entirely.
    pub fn without_date_range(mut self) -> Self {
        self.begin = None;
        self.end = None;
        self
    }

    /// Add an arbitrary attribute filter, e.g. `producttype = SLC`.
    pub fn filter(mut self, name: &str, value: &str) -> Self {
        self.filters.push((name.to_string(), value.to_string()));
        self
    }

    /// Assemble the query string.
    ///
    /// Clause order is fixed: date range, footprint, then filters in
    /// insertion order. An empty query (no clauses) yields an empty string,
    /// which the server treats as "match everything".
    pub fn build(&self) -> String {
        let mut clauses = Vec::new();

        if let (Some(begin), Some(end)) = (&self.begin, &self.end) {
            clauses.push(format!("(beginPosition:[{} TO {}])", begin, end));
        }

        if let Some(area) = &self.area {
            clauses.push(format!("(footprint:\"Intersects({})\")", area));
        }

        for (name, value) in &self.filters {
            clauses.push(format!("({}:{})", name, value));
        }

        clauses.join(" AND ")
    }
}

/// Build the search endpoint URL with pagination parameters.
///
/// `api_url` must end with a slash (the client config guarantees this).
pub fn search_url(api_url: &str, rows: usize, start: usize) -> String {
    format!("{}search?format=json&rows={}&start={}", api_url, rows, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_query_date_forms() {
        assert_eq!(
            normalize_query_date("2015-01-01T00:00:00Z").unwrap(),
            "2015-01-01T00:00:00Z"
        );
        assert_eq!(
            normalize_query_date("20150101").unwrap(),
            "2015-01-01T00:00:00Z"
        );
        assert_eq!(
            format_date(Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap()),
            "2015-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_relative_dates_pass_through() {
        for expr in [
            "NOW",
            "NOW-1DAY",
            "NOW-1DAYS",
            "NOW-500DAY",
            "NOW-500DAYS",
            "NOW-2MONTH",
            "NOW-2MONTHS",
            "NOW-20MINUTE",
            "NOW-20MINUTES",
        ] {
            assert_eq!(normalize_query_date(expr).unwrap(), expr);
        }
    }

    #[test]
    fn test_malformed_relative_dates_rejected() {
        for expr in [
            "NOW - 1HOUR",
            "NOW -   1HOURS",
            "NOW-1 HOURS",
            "NOW+10HOUR",
            "NOW-1",
            "NOW-",
        ] {
            assert!(
                normalize_query_date(expr).is_err(),
                "expected rejection of {:?}",
                expr
            );
        }
    }

    #[test]
    fn test_query_with_area_and_dates() {
        let query = SearchQuery::new()
            .area("POLYGON((0 0,1 1,0 1,0 0))")
            .date_range("2015-01-01T00:00:00Z", "2015-01-02T00:00:00Z")
            .unwrap()
            .build();
        assert_eq!(
            query,
            "(beginPosition:[2015-01-01T00:00:00Z TO 2015-01-02T00:00:00Z]) \
             AND (footprint:\"Intersects(POLYGON((0 0,1 1,0 1,0 0)))\")"
        );
    }

    #[test]
    fn test_query_with_filter() {
        let query = SearchQuery::new()
            .area("POLYGON((0 0,1 1,0 1,0 0))")
            .filter("producttype", "SLC")
            .build();
        assert_eq!(
            query,
            "(beginPosition:[NOW-1DAY TO NOW]) \
             AND (footprint:\"Intersects(POLYGON((0 0,1 1,0 1,0 0)))\") \
             AND (producttype:SLC)"
        );
    }

    #[test]
    fn test_default_query_covers_last_day() {
        assert_eq!(SearchQuery::new().build(), "(beginPosition:[NOW-1DAY TO NOW])");
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(SearchQuery::new().without_date_range().build(), "");
    }

    #[test]
    fn test_search_url_pagination() {
        assert_eq!(
            search_url("https://scihub.copernicus.eu/apihub/", 100, 0),
            "https://scihub.copernicus.eu/apihub/search?format=json&rows=100&start=0"
        );
        assert_eq!(
            search_url("https://scihub.copernicus.eu/apihub/", 100, 200),
            "https://scihub.copernicus.eu/apihub/search?format=json&rows=100&start=200"
        );
    }
}
