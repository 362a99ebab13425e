//! coinlab CLI: price tables, index, audit and cache management.
//!
//! Commands:
//! - `prices`: fetch daily prices from CoinGecko, write per-asset and merged Parquet
//! - `index`: build the buy-and-hold index CSV from a daily table
//! - `audit`: check every artifact and write the audit report
//! - `cache status`: list cached API responses with age and freshness
//! - `cache clean`: remove cached responses older than N days

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use coinlab_core::data::{FailurePolicy, JsonCache, Lookback, StdoutProgress};
use coinlab_runner::{
    init_logging, make_index, make_prices, price_fetcher, run_audit, write_report, LogConfig,
    PipelineConfig,
};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "coinlab",
    version,
    about = "coinlab: cached crypto daily prices and buy-and-hold index"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch daily prices and write per-asset and merged Parquet tables.
    Prices {
        /// Days of history, or "max".
        #[arg(long, value_parser = Lookback::parse)]
        lookback: Option<Lookback>,

        /// Quote currency (e.g. usd).
        #[arg(long)]
        currency: Option<String>,

        /// Cache TTL in seconds.
        #[arg(long)]
        ttl_seconds: Option<u64>,

        /// Keep fetching other assets when one fails.
        #[arg(long, default_value_t = false)]
        isolate: bool,

        #[command(flatten)]
        paths: PathArgs,
    },
    /// Build the buy-and-hold index CSV from a daily table.
    Index {
        /// Asset label to index (e.g. btc).
        #[arg(long)]
        asset: Option<String>,

        /// Starting index level.
        #[arg(long)]
        base: Option<f64>,

        #[command(flatten)]
        paths: PathArgs,
    },
    /// Audit every artifact and write the report.
    Audit {
        /// Minimum rows per asset table.
        #[arg(long)]
        min_rows: Option<usize>,

        /// Minimum rows in the merged table.
        #[arg(long)]
        min_merged_rows: Option<usize>,

        #[command(flatten)]
        paths: PathArgs,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Directory overrides shared by the pipeline commands.
#[derive(Args, Default)]
struct PathArgs {
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    #[arg(long)]
    processed_dir: Option<PathBuf>,
    #[arg(long)]
    index_dir: Option<PathBuf>,
    #[arg(long)]
    reports_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached responses with age and freshness.
    Status {
        /// Cache directory. Defaults to the configured one.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Remove cached responses fetched more than the given number of days ago.
    Clean {
        /// Remove entries older than this many days.
        #[arg(long)]
        unused_days: u64,

        /// Cache directory. Defaults to the configured one.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if cli.verbose {
        log_config = log_config.with_default_level("debug");
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("warning: logging not initialized: {e}");
    }

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Prices {
            lookback,
            currency,
            ttl_seconds,
            isolate,
            paths,
        } => {
            if let Some(lookback) = lookback {
                config.api.lookback = lookback;
            }
            if let Some(currency) = currency {
                config.api.currency = currency;
            }
            if let Some(ttl) = ttl_seconds {
                config.api.ttl_seconds = ttl;
            }
            if isolate {
                config.failure_policy = FailurePolicy::Isolate;
            }
            apply_paths(&mut config, paths);
            config.validate()?;
            run_prices(&config)
        }
        Commands::Index { asset, base, paths } => {
            if let Some(asset) = asset {
                config.index.asset = asset;
            }
            if let Some(base) = base {
                config.index.base = base;
            }
            apply_paths(&mut config, paths);
            config.validate()?;
            run_index(&config)
        }
        Commands::Audit {
            min_rows,
            min_merged_rows,
            paths,
        } => {
            if let Some(n) = min_rows {
                config.audit.min_rows = n;
            }
            if let Some(n) = min_merged_rows {
                config.audit.min_merged_rows = n;
            }
            apply_paths(&mut config, paths);
            run_audit_cmd(&config)
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => {
                let dir = cache_dir.unwrap_or(config.paths.cache_dir.clone());
                run_cache_status(&dir, &config)
            }
            CacheAction::Clean {
                unused_days,
                cache_dir,
                confirm,
            } => {
                let dir = cache_dir.unwrap_or(config.paths.cache_dir.clone());
                run_cache_clean(&dir, unused_days, confirm)
            }
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            PipelineConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))
        }
        None => {
            debug!("no config file given, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

fn apply_paths(config: &mut PipelineConfig, paths: PathArgs) {
    if let Some(dir) = paths.cache_dir {
        config.paths.cache_dir = dir;
    }
    if let Some(dir) = paths.processed_dir {
        config.paths.processed_dir = dir;
    }
    if let Some(dir) = paths.index_dir {
        config.paths.index_dir = dir;
    }
    if let Some(dir) = paths.reports_dir {
        config.paths.reports_dir = dir;
    }
}

fn run_prices(config: &PipelineConfig) -> Result<()> {
    let fetcher = price_fetcher(config)?;
    let summary = make_prices(config, &fetcher, &StdoutProgress)?;

    println!();
    for asset in &summary.assets {
        println!("Wrote {} ({} rows): {}", asset.label, asset.rows, asset.path.display());
    }
    match &summary.merged {
        Some(merged) => println!("Wrote merged ({} rows): {}", merged.rows, merged.path.display()),
        None => println!("Merged table not written: one side of the merge is missing."),
    }

    if !summary.is_complete() {
        for (asset, err) in &summary.failures {
            eprintln!("Error for {asset}: {err}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_index(config: &PipelineConfig) -> Result<()> {
    let out = make_index(config)?;
    println!("Wrote index for {} ({} rows): {}", out.label, out.rows, out.path.display());
    if let (Some(first), Some(last)) = (out.first_level, out.last_level) {
        println!("  first level: {first:.4}");
        println!("  last level:  {last:.4}");
    }
    Ok(())
}

fn run_audit_cmd(config: &PipelineConfig) -> Result<()> {
    let report = run_audit(config);
    let path = config.audit_report_path();
    write_report(&report, &path)?;

    println!("Wrote audit report to {}", path.display());
    println!();
    print!("{}", report.render());
    println!();
    println!(
        "{} of {} rules passed",
        report.rule_count() - report.failed_count(),
        report.rule_count()
    );

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_cache_status(cache_dir: &Path, config: &PipelineConfig) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let entries = JsonCache::new(cache_dir).entries()?;
    if entries.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    let now = Utc::now();
    let ttl = config.ttl();
    let total_size: u64 = entries.iter().map(|e| e.size_bytes).sum();

    println!("Cache: {}", cache_dir.display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total_size));
    println!("TTL: {}s", ttl.as_secs());
    println!();
    println!("{:<40} {:<22} {:<8} {:>10}", "Key", "Fetched (UTC)", "Fresh", "Size");
    println!("{}", "-".repeat(83));
    for entry in &entries {
        let fetched = entry
            .fetched_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "(unreadable)".into());
        let fresh = if entry.is_fresh(ttl, now) { "yes" } else { "no" };
        println!(
            "{:<40} {:<22} {:<8} {:>10}",
            entry.key,
            fetched,
            fresh,
            format_size(entry.size_bytes)
        );
    }

    Ok(())
}

fn run_cache_clean(cache_dir: &Path, unused_days: u64, confirm: bool) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let cache = JsonCache::new(cache_dir);
    let cutoff = clean_cutoff(Utc::now(), unused_days)?;

    // Entries without a readable stamp are left alone.
    let to_remove: Vec<_> = cache
        .entries()?
        .into_iter()
        .filter(|e| e.fetched_at.is_some_and(|t| t < cutoff))
        .collect();

    if to_remove.is_empty() {
        println!("No entries older than {unused_days} days to remove.");
        return Ok(());
    }

    println!(
        "Found {} entr{} older than {unused_days} days:",
        to_remove.len(),
        if to_remove.len() == 1 { "y" } else { "ies" }
    );
    for entry in &to_remove {
        println!("  {} ({})", entry.key, format_size(entry.size_bytes));
    }

    if !confirm {
        println!();
        println!("Dry run: pass --confirm to actually delete.");
        return Ok(());
    }

    for entry in &to_remove {
        cache.remove(&entry.key)?;
        println!("Removed: {}", entry.key);
    }

    println!(
        "Done. Removed {} entr{}.",
        to_remove.len(),
        if to_remove.len() == 1 { "y" } else { "ies" }
    );
    Ok(())
}

/// `now` minus `unused_days`, or an error when that falls outside the calendar.
fn clean_cutoff(now: DateTime<Utc>, unused_days: u64) -> Result<DateTime<Utc>> {
    i64::try_from(unused_days)
        .ok()
        .and_then(TimeDelta::try_days)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--unused-days {unused_days} is out of range"))
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn prices_flags_parse() {
        let cli =
            Cli::try_parse_from(["coinlab", "prices", "--lookback", "max", "--isolate"]).unwrap();
        match cli.command {
            Commands::Prices {
                lookback, isolate, ..
            } => {
                assert_eq!(lookback, Some(Lookback::Max));
                assert!(isolate);
            }
            _ => panic!("expected prices"),
        }
    }

    #[test]
    fn bad_lookback_is_rejected() {
        assert!(Cli::try_parse_from(["coinlab", "prices", "--lookback", "0"]).is_err());
        assert!(Cli::try_parse_from(["coinlab", "prices", "--lookback", "forever"]).is_err());
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["coinlab", "audit", "--config", "coinlab.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("coinlab.toml")));
    }

    #[test]
    fn path_overrides_apply() {
        let mut config = PipelineConfig::default();
        apply_paths(
            &mut config,
            PathArgs {
                processed_dir: Some(PathBuf::from("/tmp/p")),
                ..Default::default()
            },
        );
        assert_eq!(config.paths.processed_dir, PathBuf::from("/tmp/p"));
        assert_eq!(config.paths.cache_dir, PathBuf::from("data/cache"));
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn clean_cutoff_subtracts_days() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let cutoff = clean_cutoff(now, 30).unwrap();
        assert_eq!(now - cutoff, TimeDelta::days(30));
    }

    #[test]
    fn clean_cutoff_rejects_huge_ages() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(clean_cutoff(now, 1_000_000_000).is_err());
        assert!(clean_cutoff(now, u64::MAX).is_err());
        let err = clean_cutoff(now, u64::MAX).unwrap_err();
        assert!(err.to_string().contains("--unused-days"));
    }
}
