//! coinlab runner: pipeline steps, configuration, artifacts and audit.
//!
//! This crate builds on `coinlab-core` to provide:
//! - TOML pipeline configuration with defaults and validation
//! - `make_prices`: fetch, normalize and persist each asset, then the merged pair
//! - `make_index`: buy-and-hold index CSV from a persisted daily table
//! - Audit report over every artifact
//! - Logging initialization for the binary

pub mod audit;
pub mod config;
pub mod export;
pub mod logging;
pub mod pipeline;

pub use audit::{run_audit, write_report, AuditReport};
pub use config::{ConfigError, PipelineConfig};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use pipeline::{
    make_index, make_prices, price_fetcher, IndexOutput, PipelineError, PricesSummary,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<PricesSummary>();
        assert_sync::<PricesSummary>();
        assert_send::<IndexOutput>();
        assert_sync::<IndexOutput>();
        assert_send::<AuditReport>();
        assert_sync::<AuditReport>();
    }

    #[test]
    fn pipeline_error_is_send_sync() {
        assert_send::<PipelineError>();
        assert_sync::<PipelineError>();
    }
}
