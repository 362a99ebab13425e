//! Parquet I/O for the daily and merged tables.
//!
//! `date` is stored as a Polars `Date` (days since the Unix epoch, UTC
//! calendar day). Price and volume columns are nullable `Float64`.

use super::merge::MergedSeries;
use super::normalize::DailyRecord;
use super::provider::DataError;
use super::schema::DailySchema;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::path::Path;

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn date_to_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn days_to_date(days: i32) -> NaiveDate {
    epoch() + chrono::Duration::days(days as i64)
}

fn date_column(dates: impl Iterator<Item = NaiveDate>) -> Result<Column, DataError> {
    let days: Vec<i32> = dates.map(date_to_days).collect();
    Column::new("date".into(), days)
        .cast(&DataType::Date)
        .map_err(|e| DataError::Parquet(format!("date cast: {e}")))
}

fn daily_columns<'a>(
    prefix: &str,
    records: impl Iterator<Item = &'a DailyRecord> + Clone,
) -> Vec<Column> {
    let name = |c: &str| -> PlSmallStr {
        if prefix.is_empty() {
            c.into()
        } else {
            format!("{prefix}_{c}").into()
        }
    };
    let f = |sel: fn(&DailyRecord) -> Option<f64>| -> Vec<Option<f64>> {
        records.clone().map(sel).collect()
    };

    vec![
        Column::new(name("open"), f(|r| r.open)),
        Column::new(name("high"), f(|r| r.high)),
        Column::new(name("low"), f(|r| r.low)),
        Column::new(name("close"), f(|r| r.close)),
        Column::new(name("vol"), f(|r| r.vol)),
        Column::new(
            name("missing_hours"),
            records.clone().map(|r| r.missing_hours).collect::<Vec<bool>>(),
        ),
    ]
}

/// Convert daily records to a DataFrame with the canonical schema.
pub fn daily_to_dataframe(records: &[DailyRecord]) -> Result<DataFrame, DataError> {
    let mut columns = vec![date_column(records.iter().map(|r| r.date))?];
    columns.extend(daily_columns("", records.iter()));
    DataFrame::new(columns).map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

/// Convert a merged series to a DataFrame with prefixed columns.
pub fn merged_to_dataframe(merged: &MergedSeries) -> Result<DataFrame, DataError> {
    let mut columns = vec![date_column(merged.rows.iter().map(|r| r.date))?];
    columns.extend(daily_columns(
        &merged.left_prefix,
        merged.rows.iter().map(|r| &r.left),
    ));
    columns.extend(daily_columns(
        &merged.right_prefix,
        merged.rows.iter().map(|r| &r.right),
    ));
    DataFrame::new(columns).map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

/// Convert a DataFrame with the daily schema back into records.
pub fn dataframe_to_daily(df: &DataFrame) -> Result<Vec<DailyRecord>, DataError> {
    DailySchema::validate(df)?;

    let map_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));
    let f64_col = |name: &str| -> Result<Float64Chunked, DataError> {
        Ok(df.column(name).map_err(map_err)?.f64().map_err(map_err)?.clone())
    };

    let dates = date_values(df)?;
    let open = f64_col("open")?;
    let high = f64_col("high")?;
    let low = f64_col("low")?;
    let close = f64_col("close")?;
    let vol = f64_col("vol")?;
    let missing = df
        .column("missing_hours")
        .map_err(map_err)?
        .bool()
        .map_err(map_err)?;

    Ok(dates
        .into_iter()
        .enumerate()
        .map(|(i, date)| DailyRecord {
            date,
            open: open.get(i),
            high: high.get(i),
            low: low.get(i),
            close: close.get(i),
            vol: vol.get(i),
            missing_hours: missing.get(i).unwrap_or(close.get(i).is_none()),
        })
        .collect())
}

/// The `date` column as calendar days. Null dates are an error.
pub fn date_values(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    let date_ca = df
        .column("date")
        .map_err(|e| DataError::Parquet(format!("column read: {e}")))?
        .date()
        .map_err(|e| DataError::Parquet(format!("date column type: {e}")))?;

    (0..df.height())
        .map(|i| {
            date_ca
                .get(i)
                .map(days_to_date)
                .ok_or_else(|| DataError::Parquet(format!("null date at row {i}")))
        })
        .collect()
}

/// Write a DataFrame to a Parquet file, creating parent directories.
///
/// Writes go to a `.tmp` sibling first and are renamed into place.
pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::Parquet(format!("create dir {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Parquet(format!("atomic rename failed: {e}"))
    })?;
    Ok(())
}

/// Read a Parquet file into a DataFrame.
pub fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path)
        .map_err(|e| DataError::Parquet(format!("open {}: {e}", path.display())))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read {}: {e}", path.display())))
}

/// Write a per-asset daily table.
pub fn write_daily(records: &[DailyRecord], path: &Path) -> Result<(), DataError> {
    write_parquet(&daily_to_dataframe(records)?, path)
}

/// Read and validate a per-asset daily table.
pub fn read_daily(path: &Path) -> Result<Vec<DailyRecord>, DataError> {
    dataframe_to_daily(&read_parquet(path)?)
}

/// Write a merged table.
pub fn write_merged(merged: &MergedSeries, path: &Path) -> Result<(), DataError> {
    write_parquet(&merged_to_dataframe(merged)?, path)
}
