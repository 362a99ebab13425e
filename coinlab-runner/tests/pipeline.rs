//! End-to-end pipeline tests: prices → index → audit in a temp workspace,
//! over a fake transport that serves synthetic CoinGecko charts.

use coinlab_core::data::{
    DataError, HttpFetcher, HttpResponse, JsonCache, PriceFetcher, QueryParams,
    SilentProgress,
};
use coinlab_runner::export::load_index_csv;
use coinlab_runner::{
    make_index, make_prices, run_audit, write_report, PipelineConfig, PipelineError,
};
use serde_json::{json, Value};
use std::cell::Cell;
use std::path::Path;

const JAN1_MS: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z
const DAY_MS: i64 = 86_400_000;

/// Serves `days` of daily closes per known coin; unknown coins get a 404.
struct FakeCoinGecko {
    calls: Cell<usize>,
}

impl FakeCoinGecko {
    fn new() -> Self {
        Self { calls: Cell::new(0) }
    }

    fn chart(first_day: i64, days: i64, start_price: f64) -> Value {
        let prices: Vec<Value> = (first_day..first_day + days)
            .map(|d| json!([JAN1_MS + d * DAY_MS, start_price * (1.0 + 0.001 * d as f64)]))
            .collect();
        let volumes: Vec<Value> = (first_day..first_day + days)
            .map(|d| json!([JAN1_MS + d * DAY_MS, 1.0e9]))
            .collect();
        json!({"prices": prices, "total_volumes": volumes})
    }
}

impl HttpFetcher for FakeCoinGecko {
    fn get_json(&self, url: &str, _params: &QueryParams) -> Result<HttpResponse, DataError> {
        self.calls.set(self.calls.get() + 1);
        let body = if url.contains("/coins/bitcoin/") {
            Self::chart(0, 400, 42_000.0)
        } else if url.contains("/coins/ethereum/") {
            Self::chart(5, 395, 2_300.0)
        } else {
            return Ok(HttpResponse {
                status: 404,
                body: json!({"error": "coin not found"}),
            });
        };
        Ok(HttpResponse { status: 200, body })
    }
}

fn workspace_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.paths.cache_dir = root.join("cache");
    config.paths.processed_dir = root.join("processed");
    config.paths.index_dir = root.join("index");
    config.paths.reports_dir = root.join("reports");
    config
}

fn fetcher<'a>(
    config: &PipelineConfig,
    http: &'a FakeCoinGecko,
) -> PriceFetcher<&'a FakeCoinGecko> {
    PriceFetcher::new(http, JsonCache::new(&config.paths.cache_dir)).with_ttl(config.ttl())
}

#[test]
fn full_pipeline_passes_audit() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace_config(dir.path());
    let http = FakeCoinGecko::new();

    let prices = make_prices(&config, &fetcher(&config, &http), &SilentProgress).unwrap();
    assert!(prices.is_complete());
    assert_eq!(prices.assets.len(), 2);
    assert_eq!(prices.assets[0].rows, 400);
    assert_eq!(prices.merged.as_ref().unwrap().rows, 395);
    assert!(config.daily_path("btc").exists());
    assert!(config.daily_path("eth").exists());
    assert!(config.merged_path().exists());

    let index = make_index(&config).unwrap();
    assert_eq!(index.rows, 400);
    assert_eq!(index.first_level, Some(1000.0));
    let csv = load_index_csv(&config.index_path()).unwrap();
    assert_eq!(csv[0].date.to_string(), "2024-01-01");
    let expected_last = 1000.0 * (1.0 + 0.001 * 399.0);
    assert!((csv[399].index_level - expected_last).abs() < 1e-6);

    let report = run_audit(&config);
    assert!(report.all_passed(), "{}", report.render());
    write_report(&report, &config.audit_report_path()).unwrap();
    let text = std::fs::read_to_string(config.audit_report_path()).unwrap();
    assert!(text.contains("[PASS] Index starts at 1000"));
    assert!(!text.contains("[FAIL]"));
}

#[test]
fn second_run_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace_config(dir.path());
    let http = FakeCoinGecko::new();

    make_prices(&config, &fetcher(&config, &http), &SilentProgress).unwrap();
    assert_eq!(http.calls.get(), 2);
    make_prices(&config, &fetcher(&config, &http), &SilentProgress).unwrap();
    assert_eq!(http.calls.get(), 2);
}

#[test]
fn abort_policy_writes_nothing_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::from_toml(
        r#"
[[assets]]
id = "notacoin"
label = "nac"

[[assets]]
id = "ethereum"
label = "eth"

[merge]
left = "nac"
right = "eth"

[index]
asset = "eth"
"#,
    )
    .unwrap();
    let root = workspace_config(dir.path());
    config.paths = root.paths;
    let http = FakeCoinGecko::new();

    let err = make_prices(&config, &fetcher(&config, &http), &SilentProgress).unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, PipelineError::FetchFailed(_)));
    assert!(msg.contains("notacoin"), "{msg}");
    assert!(msg.contains("404"), "{msg}");
    // ethereum was never attempted
    assert_eq!(http.calls.get(), 1);
    assert!(!config.daily_path("eth").exists());
}

#[test]
fn isolate_policy_keeps_healthy_assets() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::from_toml(
        r#"
failure_policy = "isolate"

[[assets]]
id = "notacoin"
label = "nac"

[[assets]]
id = "ethereum"
label = "eth"

[merge]
left = "nac"
right = "eth"

[index]
asset = "eth"
"#,
    )
    .unwrap();
    let root = workspace_config(dir.path());
    config.paths = root.paths;
    let http = FakeCoinGecko::new();

    let prices = make_prices(&config, &fetcher(&config, &http), &SilentProgress).unwrap();
    assert!(!prices.is_complete());
    assert_eq!(prices.failures.len(), 1);
    assert_eq!(prices.failures[0].0, "notacoin");
    assert!(prices.merged.is_none());
    assert!(config.daily_path("eth").exists());
    assert!(!config.merged_path().exists());

    // The index only needs its own asset
    let index = make_index(&config).unwrap();
    assert_eq!(index.rows, 395);

    let report = run_audit(&config);
    let failures = report.failures();
    assert!(failures.iter().any(|m| m.contains("nac daily")), "{failures:?}");
    assert!(failures.iter().any(|m| m.contains("merged daily")), "{failures:?}");
}

#[test]
fn audit_flags_short_series() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = workspace_config(dir.path());
    config.audit.min_rows = 500;
    let http = FakeCoinGecko::new();

    make_prices(&config, &fetcher(&config, &http), &SilentProgress).unwrap();
    make_index(&config).unwrap();

    let report = run_audit(&config);
    let failures = report.failures();
    assert_eq!(failures.len(), 2, "{failures:?}");
    assert!(failures[0].starts_with("BTC has at least 500 rows"));
    assert!(failures[1].starts_with("ETH has at least 500 rows"));
}
