//! Raw price types, structured errors and the HTTP collaborator trait.
//!
//! The `HttpFetcher` trait abstracts over the transport so the price fetcher
//! can run against the real backoff client or a scripted fake in tests.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use super::schema::SchemaError;

/// One point of the raw daily series, as parsed from the API payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPricePoint {
    pub timestamp: DateTime<Utc>,
    /// UTC calendar day of `timestamp`.
    pub date: NaiveDate,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Trailing window requested from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    Days(u32),
    Max,
}

impl Lookback {
    /// Free-tier ceiling used by the range-limit fallback.
    pub const FREE_TIER: Lookback = Lookback::Days(365);

    /// Parse `"max"` or a positive day count.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") {
            return Ok(Lookback::Max);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("lookback must be at least 1 day".into()),
            Ok(n) => Ok(Lookback::Days(n)),
            Err(_) => Err(format!("invalid lookback '{s}' (expected a day count or 'max')")),
        }
    }
}

impl Default for Lookback {
    fn default() -> Self {
        Lookback::FREE_TIER
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Days(n) => write!(f, "{n}"),
            Lookback::Max => f.write_str("max"),
        }
    }
}

impl Serialize for Lookback {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Lookback::Days(n) => s.serialize_u32(*n),
            Lookback::Max => s.serialize_str("max"),
        }
    }
}

impl<'de> Deserialize<'de> for Lookback {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct LookbackVisitor;

        impl de::Visitor<'_> for LookbackVisitor {
            type Value = Lookback;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive day count or \"max\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Lookback, E> {
                match u32::try_from(v) {
                    Ok(0) | Err(_) => Err(E::custom(format!("lookback out of range: {v}"))),
                    Ok(n) => Ok(Lookback::Days(n)),
                }
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Lookback, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(format!("lookback out of range: {v}")))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Lookback, E> {
                Lookback::parse(v).map_err(E::custom)
            }
        }

        d.deserialize_any(LookbackVisitor)
    }
}

/// Structured error types for data operations.
///
/// These are displayed verbatim by the CLI, so every fatal variant names the
/// asset it failed on.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("fetch failed for '{asset}': HTTP {status}: {body}")]
    Fetch {
        asset: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("non-numeric {field} value {value} at {timestamp_ms}")]
    NonNumeric {
        field: &'static str,
        timestamp_ms: i64,
        value: serde_json::Value,
    },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Final status/body pair returned by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Query parameters, kept ordered so URLs and logs are deterministic.
pub type QueryParams = BTreeMap<String, String>;

/// HTTP GET returning a parsed JSON body.
///
/// Implementations handle transient failures internally and only return the
/// final response. An `Err` means no response was obtained at all.
pub trait HttpFetcher {
    fn get_json(&self, url: &str, params: &QueryParams) -> Result<HttpResponse, DataError>;
}

impl<T: HttpFetcher + ?Sized> HttpFetcher for &T {
    fn get_json(&self, url: &str, params: &QueryParams) -> Result<HttpResponse, DataError> {
        (**self).get_json(url, params)
    }
}

/// Progress callback for multi-asset operations.
pub trait FetchProgress {
    /// Called when starting to fetch an asset.
    fn on_start(&self, asset: &str, index: usize, total: usize);

    /// Called when an asset fetch completes.
    fn on_complete(
        &self,
        asset: &str,
        index: usize,
        total: usize,
        result: Result<usize, &DataError>,
    );

    /// Called when the entire batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_start(&self, asset: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {asset}...", index + 1, total);
    }

    fn on_complete(
        &self,
        asset: &str,
        _index: usize,
        _total: usize,
        result: Result<usize, &DataError>,
    ) {
        match result {
            Ok(rows) => println!("  OK: {asset} ({rows} rows)"),
            Err(e) => println!("  FAIL: {asset}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nFetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Progress reporter that discards every event.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _asset: &str, _index: usize, _total: usize) {}
    fn on_complete(
        &self,
        _asset: &str,
        _index: usize,
        _total: usize,
        _result: Result<usize, &DataError>,
    ) {
    }
    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}
