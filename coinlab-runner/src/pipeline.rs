//! Pipeline steps: `make_prices` and `make_index`.
//!
//! `make_prices` fetches every configured asset, writes one daily Parquet
//! table per asset, then inner-joins the configured pair into the merged
//! table. `make_index` reads one daily table back and writes the
//! buy-and-hold index CSV.

use std::path::PathBuf;

use coinlab_core::data::{
    download_assets, duplicate_dates, merge, parquet, validate_daily, BackoffClient, DataError,
    FailurePolicy, FetchProgress, HttpFetcher, JsonCache, PriceFetcher, SchemaError,
};
use coinlab_core::build_index;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::export;

/// Errors from the pipeline steps.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("fetch failed for {}", join_failures(.0))]
    FetchFailed(Vec<(String, String)>),

    #[error("no daily table for '{label}' at {}; run `coinlab prices` first", .path.display())]
    MissingInput { label: String, path: PathBuf },

    #[error(transparent)]
    Export(#[from] anyhow::Error),
}

fn join_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(asset, reason)| format!("{asset} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the production fetcher from config.
pub fn price_fetcher(
    config: &PipelineConfig,
) -> Result<PriceFetcher<BackoffClient>, PipelineError> {
    let http = BackoffClient::new(config.backoff())?;
    Ok(PriceFetcher::new(http, JsonCache::new(&config.paths.cache_dir))
        .with_base_url(config.api.base_url.clone())
        .with_ttl(config.ttl())
        .with_policy(config.api.non_numeric))
}

/// One per-asset table written by `make_prices`.
#[derive(Debug, Clone)]
pub struct AssetOutput {
    pub id: String,
    pub label: String,
    pub rows: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MergedOutput {
    pub rows: usize,
    pub path: PathBuf,
}

/// Result of `make_prices`.
#[derive(Debug, Clone, Default)]
pub struct PricesSummary {
    pub assets: Vec<AssetOutput>,
    /// `None` when one side of the merge was not fetched.
    pub merged: Option<MergedOutput>,
    /// `(asset id, error)` for every asset that failed or was skipped.
    pub failures: Vec<(String, String)>,
}

impl PricesSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.merged.is_some()
    }
}

/// Fetch, normalize and persist every configured asset, then the merged pair.
///
/// Under [`FailurePolicy::Abort`] the first fetch failure fails the step
/// before anything is written. Under [`FailurePolicy::Isolate`] the
/// successful assets are written, failures are listed in the summary, and the
/// merge is skipped if either side is missing.
pub fn make_prices<H: HttpFetcher>(
    config: &PipelineConfig,
    fetcher: &PriceFetcher<H>,
    progress: &dyn FetchProgress,
) -> Result<PricesSummary, PipelineError> {
    let ids: Vec<&str> = config.assets.iter().map(|a| a.id.as_str()).collect();
    let download = download_assets(
        fetcher,
        &ids,
        &config.api.currency,
        config.api.lookback,
        config.failure_policy,
        progress,
    );

    let mut failures: Vec<(String, String)> = download
        .errors
        .iter()
        .map(|(asset, e)| (asset.clone(), e.to_string()))
        .chain(
            download
                .skipped
                .iter()
                .map(|asset| (asset.clone(), "skipped after earlier failure".to_string())),
        )
        .collect();
    if config.failure_policy == FailurePolicy::Abort && !failures.is_empty() {
        return Err(PipelineError::FetchFailed(failures));
    }

    let mut summary = PricesSummary::default();
    for asset in &config.assets {
        let Some(records) = download.records(&asset.id) else {
            continue;
        };
        let dups = duplicate_dates(records);
        if !dups.is_empty() {
            warn!(
                asset = %asset.id,
                count = dups.len(),
                first = %dups[0],
                "duplicate dates in daily series"
            );
        }

        let path = config.daily_path(&asset.label);
        export::save_daily(records, &path)?;
        info!(asset = %asset.id, rows = records.len(), path = %path.display(), "wrote daily table");
        summary.assets.push(AssetOutput {
            id: asset.id.clone(),
            label: asset.label.clone(),
            rows: records.len(),
            path,
        });
    }

    let left = config
        .asset_by_label(&config.merge.left)
        .and_then(|a| download.records(&a.id));
    let right = config
        .asset_by_label(&config.merge.right)
        .and_then(|a| download.records(&a.id));
    match (left, right) {
        (Some(left), Some(right)) => {
            let merged = merge(left, &config.merge.left, right, &config.merge.right)?;
            let path = config.merged_path();
            export::save_merged(&merged, &path)?;
            info!(rows = merged.len(), path = %path.display(), "wrote merged table");
            summary.merged = Some(MergedOutput {
                rows: merged.len(),
                path,
            });
        }
        _ => warn!(
            left = %config.merge.left,
            right = %config.merge.right,
            "skipping merge: an asset was not fetched"
        ),
    }

    summary.failures.append(&mut failures);
    Ok(summary)
}

/// Result of `make_index`.
#[derive(Debug, Clone)]
pub struct IndexOutput {
    pub label: String,
    pub rows: usize,
    pub path: PathBuf,
    pub first_level: Option<f64>,
    pub last_level: Option<f64>,
}

/// Build the index for the configured asset from its daily table.
pub fn make_index(config: &PipelineConfig) -> Result<IndexOutput, PipelineError> {
    let label = &config.index.asset;
    let input = config.daily_path(label);
    if !input.exists() {
        return Err(PipelineError::MissingInput {
            label: label.clone(),
            path: input,
        });
    }

    let records = parquet::read_daily(&input)?;
    validate_daily(&records)?;
    let index = build_index(&records, config.index.base, config.index.null_returns)?;

    let path = config.index_path();
    export::save_index_csv(&index, &path)?;
    info!(asset = %label, rows = index.len(), path = %path.display(), "wrote index");

    Ok(IndexOutput {
        label: label.clone(),
        rows: index.len(),
        path,
        first_level: index.first().map(|r| r.index_level),
        last_level: index.last().map(|r| r.index_level),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_names_the_fix() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.paths.processed_dir = dir.path().join("processed");

        let err = make_index(&config).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
        assert!(msg.contains("coinlab prices"), "{msg}");
        assert!(msg.contains("btc_daily.parquet"), "{msg}");
    }

    #[test]
    fn fetch_failed_lists_assets() {
        let err = PipelineError::FetchFailed(vec![
            ("bitcoin".into(), "HTTP 500".into()),
            ("ethereum".into(), "skipped".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "fetch failed for bitcoin (HTTP 500), ethereum (skipped)"
        );
    }

    #[test]
    fn production_fetcher_builds_from_defaults() {
        assert!(price_fetcher(&PipelineConfig::default()).is_ok());
    }
}
