//! Audit report over the pipeline artifacts.
//!
//! Checks that every artifact exists, previews it, and verifies the schema
//! and invariant rules. Each rule renders as a `[PASS]` or `[FAIL]` line;
//! the report ends with BLAKE3 fingerprints (first 16 hex chars) of every
//! artifact found.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coinlab_core::data::parquet::{date_values, read_parquet};
use coinlab_core::data::schema::{DailySchema, INDEX_COLUMNS};
use coinlab_core::data::SchemaError;
use polars::prelude::DataFrame;
use tracing::info;

use crate::config::PipelineConfig;
use crate::export::import_index_csv;

const PREVIEW_ROWS: usize = 5;
const INDEX_PREVIEW_ROWS: usize = 10;
const BASE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum AuditLine {
    Heading(String),
    Text(String),
    Rule { passed: bool, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub lines: Vec<AuditLine>,
}

impl AuditReport {
    fn heading(&mut self, title: impl Into<String>) {
        self.lines.push(AuditLine::Heading(title.into()));
    }

    fn text(&mut self, text: impl Into<String>) {
        self.lines.push(AuditLine::Text(text.into()));
    }

    fn rule(&mut self, passed: bool, message: impl Into<String>) -> bool {
        self.lines.push(AuditLine::Rule {
            passed,
            message: message.into(),
        });
        passed
    }

    fn rules(&self) -> impl Iterator<Item = (bool, &str)> {
        self.lines.iter().filter_map(|line| match line {
            AuditLine::Rule { passed, message } => Some((*passed, message.as_str())),
            _ => None,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules().count()
    }

    pub fn failed_count(&self) -> usize {
        self.rules().filter(|(passed, _)| !passed).count()
    }

    /// Messages of the failed rules, in report order.
    pub fn failures(&self) -> Vec<&str> {
        self.rules()
            .filter(|(passed, _)| !passed)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                AuditLine::Heading(title) => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    let _ = writeln!(out, "{title}");
                }
                AuditLine::Text(text) => {
                    let _ = writeln!(out, "{text}");
                }
                AuditLine::Rule { passed, message } => {
                    let tag = if *passed { "PASS" } else { "FAIL" };
                    let _ = writeln!(out, "[{tag}] {message}");
                }
            }
        }
        out
    }
}

/// Audit every artifact the config points at.
pub fn run_audit(config: &PipelineConfig) -> AuditReport {
    let mut report = AuditReport::default();
    report.heading("# coinlab audit report");
    report.text(format!("generated: {}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")));

    let mut artifacts: Vec<(String, PathBuf)> = config
        .assets
        .iter()
        .map(|a| (format!("{} daily", a.label), config.daily_path(&a.label)))
        .collect();
    artifacts.push(("merged daily".to_string(), config.merged_path()));
    artifacts.push(("index csv".to_string(), config.index_path()));

    report.heading("## Required files");
    for (label, path) in &artifacts {
        report.rule(path.exists(), format!("exists: {label} -> {}", path.display()));
    }

    for asset in &config.assets {
        let path = config.daily_path(&asset.label);
        if path.exists() {
            audit_daily(&mut report, &asset.label, &path, config.audit.min_rows);
        }
    }

    let merged = config.merged_path();
    if merged.exists() {
        audit_merged(&mut report, config, &merged);
    }

    let index = config.index_path();
    if index.exists() {
        audit_index(&mut report, &index, config.index.base);
    }

    report.heading("## File fingerprints (blake3, first 16 hex)");
    for (label, path) in &artifacts {
        if path.exists() {
            let fp = fingerprint(path).unwrap_or_else(|e| format!("ERROR: {e}"));
            report.text(format!("{label:16} {fp}"));
        }
    }

    report
}

/// Write the rendered report, creating parent directories.
pub fn write_report(report: &AuditReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, report.render())
        .with_context(|| format!("failed to write audit report {}", path.display()))?;
    info!(path = %path.display(), failed = report.failed_count(), "wrote audit report");
    Ok(())
}

/// First 16 hex characters of the file's BLAKE3 hash.
pub fn fingerprint(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hex = blake3::hash(&bytes).to_hex();
    Ok(hex[..16].to_string())
}

fn load_frame(report: &mut AuditReport, name: &str, path: &Path) -> Option<DataFrame> {
    match read_parquet(path) {
        Ok(df) => {
            report.text(format!("shape=({}, {})", df.height(), df.width()));
            report.text(format!("{}", df.head(Some(PREVIEW_ROWS))));
            Some(df)
        }
        Err(e) => {
            report.rule(false, format!("{name} is readable Parquet ({e})"));
            None
        }
    }
}

fn audit_daily(report: &mut AuditReport, label: &str, path: &Path, min_rows: usize) {
    let name = label.to_uppercase();
    report.heading(format!("## {name} daily preview"));
    let Some(df) = load_frame(report, &name, path) else {
        return;
    };

    let schema_ok = report_schema(
        report,
        DailySchema::validate(&df),
        format!("{name} columns include open/high/low/close/vol/missing_hours with expected types"),
    );
    report.rule(
        df.height() >= min_rows,
        format!("{name} has at least {min_rows} rows (got {})", df.height()),
    );
    if schema_ok {
        audit_dates(report, &name, &df);
    }
}

fn audit_merged(report: &mut AuditReport, config: &PipelineConfig, path: &Path) {
    let (left, right) = (&config.merge.left, &config.merge.right);
    report.heading("## Merged daily preview");
    let Some(df) = load_frame(report, "Merged", path) else {
        return;
    };

    let schema_ok = report_schema(
        report,
        DailySchema::validate_merged(&df, left, right),
        format!("Merged columns are prefixed with {left}_/{right}_"),
    );
    let min_rows = config.audit.min_merged_rows;
    report.rule(
        df.height() >= min_rows,
        format!("Merged has at least {min_rows} rows (got {})", df.height()),
    );
    if schema_ok {
        audit_dates(report, "Merged", &df);
    }
}

fn report_schema(
    report: &mut AuditReport,
    result: Result<(), SchemaError>,
    message: String,
) -> bool {
    match result {
        Ok(()) => report.rule(true, message),
        Err(e) => report.rule(false, format!("{message} ({e})")),
    }
}

fn audit_dates(report: &mut AuditReport, name: &str, df: &DataFrame) {
    let dates = match date_values(df) {
        Ok(dates) => dates,
        Err(e) => {
            report.rule(false, format!("{name} dates are readable ({e})"));
            return;
        }
    };

    let duplicates = dates.windows(2).filter(|w| w[0] == w[1]).count();
    report.rule(
        duplicates == 0,
        format!("{name} has no duplicate dates (found {duplicates})"),
    );
    report.rule(
        dates.windows(2).all(|w| w[0] < w[1]),
        format!("{name} dates strictly increasing"),
    );
}

fn audit_index(report: &mut AuditReport, path: &Path, base: f64) {
    report.heading("## Index CSV preview");
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            report.rule(false, format!("Index CSV is readable ({e})"));
            return;
        }
    };

    let rows = text.lines().skip(1).filter(|l| !l.trim().is_empty()).count();
    let width = text.lines().next().map_or(0, |h| h.split(',').count());
    report.text(format!("shape=({rows}, {width})"));
    for line in text.lines().take(INDEX_PREVIEW_ROWS + 1) {
        report.text(line.to_string());
    }

    let header: Vec<&str> = text.lines().next().unwrap_or("").split(',').map(str::trim).collect();
    let has_columns = INDEX_COLUMNS.iter().all(|c| header.contains(c));
    report.rule(
        has_columns,
        format!("Index CSV has required columns ({})", INDEX_COLUMNS.join(", ")),
    );

    let records = match import_index_csv(&text) {
        Ok(records) => records,
        Err(e) => {
            report.rule(false, format!("Index CSV rows parse ({e:#})"));
            return;
        }
    };

    let first = records.first().map(|r| r.index_level);
    report.rule(
        first.is_some_and(|level| (level - base).abs() < BASE_TOLERANCE),
        match first {
            Some(level) => format!("Index starts at {base} on first date (got {level})"),
            None => format!("Index starts at {base} on first date (index is empty)"),
        },
    );
    report.rule(
        records.windows(2).all(|w| w[0].date < w[1].date),
        "Index dates strictly increasing",
    );
}
