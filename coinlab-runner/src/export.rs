//! Artifact export: the index CSV and the Parquet tables.
//!
//! The index CSV has the columns `date,index_level,divisor,notes` with
//! `YYYY-MM-DD` dates. Files are written whole, to a `.tmp` sibling first.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use coinlab_core::data::merge::MergedSeries;
use coinlab_core::data::normalize::DailyRecord;
use coinlab_core::data::parquet;
use coinlab_core::data::schema::INDEX_COLUMNS;
use coinlab_core::IndexRecord;

// ─── CSV export ─────────────────────────────────────────────────────

/// Render an index series as CSV text.
pub fn export_index_csv(records: &[IndexRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(INDEX_COLUMNS)?;
    for r in records {
        wtr.write_record([
            r.date.format("%Y-%m-%d").to_string(),
            r.index_level.to_string(),
            r.divisor.to_string(),
            r.notes.clone(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Parse index CSV text, rejecting files without the required columns.
pub fn import_index_csv(text: &str) -> Result<Vec<IndexRecord>> {
    let mut rdr = csv::Reader::from_reader(text.as_bytes());
    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    let missing: Vec<&str> = INDEX_COLUMNS
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .collect();
    if !missing.is_empty() {
        bail!("index CSV is missing columns: {}", missing.join(", "));
    }

    rdr.deserialize::<IndexRecord>()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("bad index row {}", i + 1)))
        .collect()
}

/// Write the index CSV, creating parent directories.
pub fn save_index_csv(records: &[IndexRecord], path: &Path) -> Result<()> {
    let csv = export_index_csv(records)?;
    write_atomic(path, csv.as_bytes())
}

pub fn load_index_csv(path: &Path) -> Result<Vec<IndexRecord>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    import_index_csv(&text)
}

// ─── Parquet export ─────────────────────────────────────────────────

pub fn save_daily(records: &[DailyRecord], path: &Path) -> Result<()> {
    parquet::write_daily(records, path)
        .with_context(|| format!("failed to write daily table {}", path.display()))
}

pub fn save_merged(merged: &MergedSeries, path: &Path) -> Result<()> {
    parquet::write_merged(merged, path)
        .with_context(|| format!("failed to write merged table {}", path.display()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to move {} into place", path.display()))
}
