//! Download orchestrator: fetch and normalize several assets with progress reporting.

use super::coingecko::PriceFetcher;
use super::normalize::{normalize, DailyRecord};
use super::provider::{DataError, FetchProgress, HttpFetcher, Lookback};
use serde::{Deserialize, Serialize};
use tracing::error;

/// How a multi-asset fetch reacts to a single asset failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failure; later assets are not fetched.
    #[default]
    Abort,
    /// Record the failure and keep fetching the remaining assets.
    Isolate,
}

/// Fetch `asset_ids` in order, normalizing each into daily records.
///
/// Always returns a summary; callers decide whether failures are fatal.
pub fn download_assets<H: HttpFetcher>(
    fetcher: &PriceFetcher<H>,
    asset_ids: &[&str],
    currency: &str,
    lookback: Lookback,
    policy: FailurePolicy,
    progress: &dyn FetchProgress,
) -> DownloadSummary {
    let total = asset_ids.len();
    let mut summary = DownloadSummary {
        total,
        series: Vec::new(),
        errors: Vec::new(),
        skipped: Vec::new(),
    };

    for (i, asset) in asset_ids.iter().enumerate() {
        progress.on_start(asset, i, total);

        let result = fetcher
            .fetch(asset, currency, lookback)
            .map(|raw| normalize(&raw));
        progress.on_complete(asset, i, total, result.as_ref().map(Vec::len));

        match result {
            Ok(records) => summary.series.push((asset.to_string(), records)),
            Err(e) => {
                error!(asset = *asset, error = %e, "fetch failed");
                summary.errors.push((asset.to_string(), e));
                if policy == FailurePolicy::Abort {
                    summary
                        .skipped
                        .extend(asset_ids[(i + 1)..].iter().map(|s| s.to_string()));
                    break;
                }
            }
        }
    }

    progress.on_batch_complete(summary.succeeded(), summary.failed(), total);
    summary
}

/// Summary of a batch fetch.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    /// Successful assets in request order.
    pub series: Vec<(String, Vec<DailyRecord>)>,
    pub errors: Vec<(String, DataError)>,
    /// Assets never attempted because an earlier one aborted the batch.
    pub skipped: Vec<String>,
}

impl DownloadSummary {
    pub fn succeeded(&self) -> usize {
        self.series.len()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty() && self.skipped.is_empty()
    }

    /// Records for one asset, if it was fetched.
    pub fn records(&self, asset: &str) -> Option<&[DailyRecord]> {
        self.series
            .iter()
            .find(|(id, _)| id == asset)
            .map(|(_, records)| records.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::JsonCache;
    use crate::data::provider::{HttpResponse, QueryParams, SilentProgress};
    use serde_json::json;
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    /// Serves a fixed chart for every asset except those listed as broken.
    struct FixedHttp {
        broken: Vec<&'static str>,
    }

    impl HttpFetcher for FixedHttp {
        fn get_json(&self, url: &str, _params: &QueryParams) -> Result<HttpResponse, DataError> {
            if self.broken.iter().any(|b| url.contains(&format!("/coins/{b}/"))) {
                return Ok(HttpResponse {
                    status: 404,
                    body: json!({"error": "coin not found"}),
                });
            }
            Ok(HttpResponse {
                status: 200,
                body: json!({
                    "prices": [[1_704_067_200_000i64, 100.0], [1_704_153_600_000i64, 110.0]],
                    "total_volumes": [[1_704_067_200_000i64, 5.0]]
                }),
            })
        }
    }

    fn fetcher(broken: Vec<&'static str>) -> PriceFetcher<FixedHttp> {
        let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir =
            env::temp_dir().join(format!("coinlab_download_test_{}_{id}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        PriceFetcher::new(FixedHttp { broken }, JsonCache::new(dir))
    }

    #[test]
    fn all_assets_succeed() {
        let f = fetcher(vec![]);
        let summary = download_assets(
            &f,
            &["bitcoin", "ethereum"],
            "usd",
            Lookback::FREE_TIER,
            FailurePolicy::Abort,
            &SilentProgress,
        );
        assert!(summary.all_succeeded());
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.records("ethereum").unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(f.cache().cache_dir());
    }

    #[test]
    fn abort_stops_at_first_failure() {
        let f = fetcher(vec!["bitcoin"]);
        let summary = download_assets(
            &f,
            &["bitcoin", "ethereum"],
            "usd",
            Lookback::FREE_TIER,
            FailurePolicy::Abort,
            &SilentProgress,
        );
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.succeeded(), 0);
        assert_eq!(summary.skipped, vec!["ethereum".to_string()]);
        assert!(matches!(
            &summary.errors[0].1,
            DataError::Fetch { asset, status: 404, .. } if asset == "bitcoin"
        ));
        let _ = std::fs::remove_dir_all(f.cache().cache_dir());
    }

    #[test]
    fn isolate_keeps_going() {
        let f = fetcher(vec!["bitcoin"]);
        let summary = download_assets(
            &f,
            &["bitcoin", "ethereum"],
            "usd",
            Lookback::FREE_TIER,
            FailurePolicy::Isolate,
            &SilentProgress,
        );
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.succeeded(), 1);
        assert!(summary.skipped.is_empty());
        assert!(summary.records("bitcoin").is_none());
        assert!(!summary.all_succeeded());
        let _ = std::fs::remove_dir_all(f.cache().cache_dir());
    }
}
