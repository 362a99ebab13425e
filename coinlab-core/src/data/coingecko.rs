//! CoinGecko `market_chart` fetcher.
//!
//! Orchestrates cache lookup, the HTTP call, the free-tier range fallback and
//! the cache write, then parses the payload into [`RawPricePoint`]s.
//!
//! The free tier rejects ranges past 365 days with `error_code` 10012. When
//! that happens the request is repeated once with `days=365`. The payload is
//! still cached under the originally requested key.

use super::cache::{is_fresh, stamp_fetched_at, JsonCache};
use super::provider::{DataError, HttpFetcher, HttpResponse, Lookback, QueryParams, RawPricePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Error code CoinGecko returns when the requested range exceeds the plan.
pub const RANGE_LIMIT_ERROR_CODE: i64 = 10012;

/// Default cache TTL: one day.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// What to do with a price or volume value that is not a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonNumericPolicy {
    /// Replace it with null and keep the row.
    #[default]
    CoerceToNull,
    /// Fail the parse with [`DataError::NonNumeric`].
    Reject,
}

/// Where a fetch result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    Cache,
    Network,
    /// Network, after the range-limit fallback fired.
    NetworkFallback,
}

/// A parsed series plus its provenance.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub points: Vec<RawPricePoint>,
    pub origin: FetchOrigin,
}

/// Cache key for a request: `{asset}_{currency}_{lookback}_market_chart`.
pub fn cache_key(asset_id: &str, currency: &str, lookback: Lookback) -> String {
    format!("{asset_id}_{currency}_{lookback}_market_chart")
}

/// CoinGecko price fetcher over an injected transport.
pub struct PriceFetcher<H> {
    http: H,
    cache: JsonCache,
    base_url: String,
    ttl: Duration,
    policy: NonNumericPolicy,
}

impl<H: HttpFetcher> PriceFetcher<H> {
    pub fn new(http: H, cache: JsonCache) -> Self {
        Self {
            http,
            cache,
            base_url: DEFAULT_BASE_URL.to_string(),
            ttl: DEFAULT_TTL,
            policy: NonNumericPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_policy(mut self, policy: NonNumericPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &JsonCache {
        &self.cache
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    /// Fetch the daily series for an asset.
    pub fn fetch(
        &self,
        asset_id: &str,
        currency: &str,
        lookback: Lookback,
    ) -> Result<Vec<RawPricePoint>, DataError> {
        self.fetch_with_origin(asset_id, currency, lookback)
            .map(|outcome| outcome.points)
    }

    /// Like [`fetch`](Self::fetch), also reporting where the data came from.
    pub fn fetch_with_origin(
        &self,
        asset_id: &str,
        currency: &str,
        lookback: Lookback,
    ) -> Result<FetchOutcome, DataError> {
        let key = cache_key(asset_id, currency, lookback);

        if let Some(cached) = self.cache.read(&key) {
            if is_fresh(&cached, self.ttl) {
                match parse_market_chart(&cached, self.policy) {
                    Ok(points) => {
                        debug!(asset = asset_id, key = %key, "cache hit");
                        return Ok(FetchOutcome {
                            points,
                            origin: FetchOrigin::Cache,
                        });
                    }
                    Err(e) => {
                        warn!(
                            asset = asset_id,
                            key = %key,
                            error = %e,
                            "unusable cache entry, refetching"
                        );
                    }
                }
            } else {
                debug!(asset = asset_id, key = %key, "cache entry stale");
            }
        }

        let (mut payload, origin) = self.request_with_fallback(asset_id, currency, lookback)?;
        check_market_chart(&payload)?;
        let points = parse_market_chart(&payload, self.policy)?;

        stamp_fetched_at(&mut payload, Utc::now());
        self.cache.write(&key, &payload)?;
        info!(asset = asset_id, rows = points.len(), key = %key, "fetched from network");
        Ok(FetchOutcome { points, origin })
    }

    /// First attempt, then at most one range-limited attempt.
    fn request_with_fallback(
        &self,
        asset_id: &str,
        currency: &str,
        lookback: Lookback,
    ) -> Result<(Value, FetchOrigin), DataError> {
        let first = self.request(asset_id, currency, lookback)?;
        let (response, origin) = if is_range_limit_error(&first) {
            warn!(
                asset = asset_id,
                requested = %lookback,
                "range exceeds free tier, retrying once with {}",
                Lookback::FREE_TIER
            );
            let second = self.request(asset_id, currency, Lookback::FREE_TIER)?;
            (second, FetchOrigin::NetworkFallback)
        } else {
            (first, FetchOrigin::Network)
        };

        if !response.is_success() {
            return Err(DataError::Fetch {
                asset: asset_id.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        Ok((response.body, origin))
    }

    fn request(
        &self,
        asset_id: &str,
        currency: &str,
        lookback: Lookback,
    ) -> Result<HttpResponse, DataError> {
        let url = format!("{}/coins/{asset_id}/market_chart", self.base_url);
        self.http.get_json(&url, &market_chart_params(currency, lookback))
    }
}

/// Query parameters for a daily `market_chart` request.
pub fn market_chart_params(currency: &str, lookback: Lookback) -> QueryParams {
    QueryParams::from([
        ("vs_currency".to_string(), currency.to_string()),
        ("days".to_string(), lookback.to_string()),
        ("interval".to_string(), "daily".to_string()),
    ])
}

/// Whether a response is the free-tier range-limit rejection.
pub fn is_range_limit_error(response: &HttpResponse) -> bool {
    !response.is_success()
        && response
            .body
            .pointer("/error/status/error_code")
            .and_then(Value::as_i64)
            == Some(RANGE_LIMIT_ERROR_CODE)
}

/// A network payload must be an object carrying a `prices` list.
fn check_market_chart(payload: &Value) -> Result<(), DataError> {
    let Some(obj) = payload.as_object() else {
        return Err(DataError::ResponseFormat(format!(
            "market_chart body is not a JSON object: {}",
            truncate_body(payload)
        )));
    };
    if !obj.get("prices").is_some_and(Value::is_array) {
        return Err(DataError::ResponseFormat(
            "market_chart body has no 'prices' list".to_string(),
        ));
    }
    Ok(())
}

fn truncate_body(payload: &Value) -> String {
    let text = payload.to_string();
    match text.char_indices().nth(200) {
        Some((i, _)) => format!("{}...", &text[..i]),
        None => text,
    }
}

/// Parse a `market_chart` payload.
///
/// `prices` and `total_volumes` are `[[ms, value], ...]` lists sharing the
/// same timestamps. Volumes are left-joined onto prices by timestamp; the
/// result is sorted ascending by timestamp, keeping payload order for ties.
pub fn parse_market_chart(
    payload: &Value,
    policy: NonNumericPolicy,
) -> Result<Vec<RawPricePoint>, DataError> {
    let prices = pairs(payload, "prices")?;
    let volumes = pairs(payload, "total_volumes")?;

    let mut volume_by_ts: HashMap<i64, Option<f64>> = HashMap::with_capacity(volumes.len());
    for (ts, raw) in volumes {
        let volume = numeric("volume", ts, raw, policy)?;
        volume_by_ts.entry(ts).or_insert(volume);
    }

    let mut points = Vec::with_capacity(prices.len());
    for (ts, raw) in prices {
        let close = numeric("close", ts, raw, policy)?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(ts)
            .ok_or_else(|| DataError::ResponseFormat(format!("timestamp out of range: {ts}")))?;
        points.push(RawPricePoint {
            timestamp,
            date: timestamp.date_naive(),
            close,
            volume: volume_by_ts.get(&ts).copied().flatten(),
        });
    }

    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

/// Extract `[ts, value]` rows from a payload list. A missing list is empty.
fn pairs<'a>(payload: &'a Value, field: &str) -> Result<Vec<(i64, &'a Value)>, DataError> {
    let rows = match payload.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(rows)) => rows,
        Some(other) => {
            return Err(DataError::ResponseFormat(format!(
                "'{field}' is not a list: {other}"
            )))
        }
    };

    rows.iter()
        .enumerate()
        .map(|(i, row)| match row.as_array().map(Vec::as_slice) {
            Some([ts, value, ..]) => timestamp_ms(ts)
                .map(|ts| (ts, value))
                .ok_or_else(|| {
                    DataError::ResponseFormat(format!("'{field}'[{i}] has invalid timestamp {ts}"))
                }),
            _ => Err(DataError::ResponseFormat(format!(
                "'{field}'[{i}] is not a [timestamp, value] pair: {row}"
            ))),
        })
        .collect()
}

/// Millisecond timestamps arrive as integers, occasionally as integral floats.
fn timestamp_ms(v: &Value) -> Option<i64> {
    if let Some(ms) = v.as_i64() {
        return Some(ms);
    }
    v.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

fn numeric(
    field: &'static str,
    timestamp_ms: i64,
    value: &Value,
    policy: NonNumericPolicy,
) -> Result<Option<f64>, DataError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite());

    match (parsed, policy) {
        (Some(f), _) => Ok(Some(f)),
        (None, NonNumericPolicy::CoerceToNull) => Ok(None),
        (None, NonNumericPolicy::Reject) => Err(DataError::NonNumeric {
            field,
            timestamp_ms,
            value: value.clone(),
        }),
    }
}
