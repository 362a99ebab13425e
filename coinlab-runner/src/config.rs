//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) describes the
//! standard BTC/ETH run: 365 days of USD closes, a `btc`/`eth` merge and a
//! BTC index based at 1000.

use coinlab_core::data::{BackoffConfig, FailurePolicy, Lookback, NonNumericPolicy};
use coinlab_core::NullReturnPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Full configuration for the `prices`, `index` and `audit` steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub failure_policy: FailurePolicy,
    pub api: ApiConfig,
    pub paths: PathsConfig,
    pub assets: Vec<AssetConfig>,
    pub merge: MergeConfig,
    pub index: IndexConfig,
    pub audit: AuditConfig,
}

/// CoinGecko request settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub currency: String,
    pub lookback: Lookback,
    pub ttl_seconds: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
    pub non_numeric: NonNumericPolicy,
}

/// Where each artifact family lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub index_dir: PathBuf,
    pub reports_dir: PathBuf,
}

/// A CoinGecko coin id and the short label used in file and column names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetConfig {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub asset: String,
    pub base: f64,
    pub null_returns: NullReturnPolicy,
}

/// Row-count thresholds checked by the audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub min_rows: usize,
    pub min_merged_rows: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: coinlab_core::data::coingecko::DEFAULT_BASE_URL.to_string(),
            currency: "usd".to_string(),
            lookback: Lookback::FREE_TIER,
            ttl_seconds: coinlab_core::data::coingecko::DEFAULT_TTL.as_secs(),
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
            non_numeric: NonNumericPolicy::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            processed_dir: PathBuf::from("data/processed"),
            index_dir: PathBuf::from("data/index"),
            reports_dir: PathBuf::from("reports"),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            left: "btc".to_string(),
            right: "eth".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            asset: "btc".to_string(),
            base: coinlab_core::DEFAULT_BASE,
            null_returns: NullReturnPolicy::default(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            min_rows: 360,
            min_merged_rows: 350,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            api: ApiConfig::default(),
            paths: PathsConfig::default(),
            assets: vec![
                AssetConfig {
                    id: "bitcoin".to_string(),
                    label: "btc".to_string(),
                },
                AssetConfig {
                    id: "ethereum".to_string(),
                    label: "eth".to_string(),
                },
            ],
            merge: MergeConfig::default(),
            index: IndexConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.is_empty() {
            return Err(ConfigError::Invalid("no assets configured".into()));
        }

        let mut labels = HashSet::new();
        for asset in &self.assets {
            if asset.id.trim().is_empty() || asset.label.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "asset id and label must be non-empty (got id='{}', label='{}')",
                    asset.id, asset.label
                )));
            }
            if !labels.insert(asset.label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate asset label '{}'",
                    asset.label
                )));
            }
        }

        for (role, label) in [
            ("merge.left", &self.merge.left),
            ("merge.right", &self.merge.right),
            ("index.asset", &self.index.asset),
        ] {
            if !labels.contains(label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "{role} '{label}' is not a configured asset label"
                )));
            }
        }
        if self.merge.left == self.merge.right {
            return Err(ConfigError::Invalid(format!(
                "merge.left and merge.right are both '{}'",
                self.merge.left
            )));
        }

        if !(self.index.base.is_finite() && self.index.base > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "index.base must be positive, got {}",
                self.index.base
            )));
        }
        if self.api.currency.trim().is_empty() {
            return Err(ConfigError::Invalid("api.currency is empty".into()));
        }
        Ok(())
    }

    pub fn asset_by_label(&self, label: &str) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.label == label)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.api.ttl_seconds)
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_retries: self.api.max_retries,
            base_delay: Duration::from_millis(self.api.base_delay_ms),
            timeout: Duration::from_secs(self.api.timeout_secs),
            ..Default::default()
        }
    }

    /// `{processed_dir}/{label}_daily.parquet`
    pub fn daily_path(&self, label: &str) -> PathBuf {
        self.paths.processed_dir.join(format!("{label}_daily.parquet"))
    }

    /// `{processed_dir}/{left}_{right}_daily.parquet`
    pub fn merged_path(&self) -> PathBuf {
        self.paths
            .processed_dir
            .join(format!("{}_{}_daily.parquet", self.merge.left, self.merge.right))
    }

    /// `{index_dir}/spot_bh_{label}_base{base}.csv`
    pub fn index_path(&self) -> PathBuf {
        self.paths.index_dir.join(format!(
            "spot_bh_{}_base{}.csv",
            self.index.asset,
            format_base(self.index.base)
        ))
    }

    pub fn audit_report_path(&self) -> PathBuf {
        self.paths.reports_dir.join("audit.txt")
    }
}

/// Whole bases print without a decimal point (`1000`, not `1000.0`).
fn format_base(base: f64) -> String {
    if base.fract() == 0.0 && base.abs() < 1e15 {
        format!("{}", base as i64)
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.api.lookback, Lookback::Days(365));
        assert_eq!(config.assets.len(), 2);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn sample_config_matches_defaults() {
        let config = PipelineConfig::from_toml(include_str!("../../coinlab.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn artifact_paths_follow_layout() {
        let config = PipelineConfig::default();
        assert_eq!(config.daily_path("btc"), PathBuf::from("data/processed/btc_daily.parquet"));
        assert_eq!(config.merged_path(), PathBuf::from("data/processed/btc_eth_daily.parquet"));
        assert_eq!(config.index_path(), PathBuf::from("data/index/spot_bh_btc_base1000.csv"));
        assert_eq!(config.audit_report_path(), PathBuf::from("reports/audit.txt"));
    }

    #[test]
    fn partial_file_overrides_selected_fields() {
        let config = PipelineConfig::from_toml(
            r#"
failure_policy = "isolate"

[api]
lookback = "max"
ttl_seconds = 60

[paths]
cache_dir = "/tmp/coinlab-cache"

[index]
base = 100.0
null_returns = "reject"
"#,
        )
        .unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
        assert_eq!(config.api.lookback, Lookback::Max);
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.api.currency, "usd");
        assert_eq!(config.paths.cache_dir, PathBuf::from("/tmp/coinlab-cache"));
        assert_eq!(config.paths.reports_dir, PathBuf::from("reports"));
        assert_eq!(config.index.null_returns, NullReturnPolicy::Reject);
        assert_eq!(config.index_path(), PathBuf::from("data/index/spot_bh_btc_base100.csv"));
    }

    #[test]
    fn custom_assets_parse() {
        let config = PipelineConfig::from_toml(
            r#"
[[assets]]
id = "solana"
label = "sol"

[[assets]]
id = "cardano"
label = "ada"

[merge]
left = "sol"
right = "ada"

[index]
asset = "ada"
"#,
        )
        .unwrap();
        assert_eq!(config.asset_by_label("sol").unwrap().id, "solana");
        assert_eq!(config.merged_path(), PathBuf::from("data/processed/sol_ada_daily.parquet"));
    }

    #[test]
    fn rejects_invalid_configs() {
        let cases = [
            "assets = []",
            "[[assets]]\nid = \"bitcoin\"\nlabel = \"btc\"\n[[assets]]\nid = \"x\"\nlabel = \"btc\"",
            "[merge]\nleft = \"doge\"",
            "[merge]\nright = \"btc\"",
            "[index]\nasset = \"sol\"",
            "[index]\nbase = 0.0",
            "[index]\nbase = -5.0",
        ];
        for case in cases {
            assert!(
                matches!(PipelineConfig::from_toml(case), Err(ConfigError::Invalid(_))),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            PipelineConfig::from_toml("[api\nbase_url ="),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml("[api]\nlookback = 0"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn backoff_uses_api_settings() {
        let mut config = PipelineConfig::default();
        config.api.max_retries = 5;
        config.api.base_delay_ms = 250;
        let backoff = config.backoff();
        assert_eq!(backoff.max_retries, 5);
        assert_eq!(backoff.base_delay, Duration::from_millis(250));
        assert_eq!(backoff.timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/coinlab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
