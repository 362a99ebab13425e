//! Raw series → canonical daily records.
//!
//! The source only publishes a daily close, so open/high/low are set equal to
//! close. Timestamps are truncated to their UTC calendar day. Duplicate days
//! are kept in parse order, not collapsed: [`duplicate_dates`] surfaces them
//! and [`validate_daily`] rejects them where a strictly increasing key is
//! required.

use super::provider::RawPricePoint;
use super::schema::SchemaError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the canonical per-asset daily table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub vol: Option<f64>,
    /// Set iff `close` is null.
    pub missing_hours: bool,
}

impl DailyRecord {
    /// Build a record from a daily close.
    pub fn from_close(date: NaiveDate, close: Option<f64>, vol: Option<f64>) -> Self {
        Self {
            date,
            open: close,
            high: close,
            low: close,
            close,
            vol,
            missing_hours: close.is_none(),
        }
    }
}

/// Normalize a raw series into daily records, sorted ascending by date.
pub fn normalize(raw: &[RawPricePoint]) -> Vec<DailyRecord> {
    let mut records: Vec<DailyRecord> = raw
        .iter()
        .map(|p| DailyRecord::from_close(p.timestamp.date_naive(), p.close, p.volume))
        .collect();
    // Stable: ties keep parse order
    records.sort_by_key(|r| r.date);
    records
}

/// Dates that appear more than once, in ascending order.
pub fn duplicate_dates(series: &[DailyRecord]) -> Vec<NaiveDate> {
    let mut dups: Vec<NaiveDate> = series
        .windows(2)
        .filter(|w| w[0].date == w[1].date)
        .map(|w| w[1].date)
        .collect();
    dups.dedup();
    dups
}

/// Require strictly increasing (and so unique) dates.
pub fn validate_daily(series: &[DailyRecord]) -> Result<(), SchemaError> {
    ensure_increasing(series.iter().map(|r| r.date))
}

pub(crate) fn ensure_increasing(
    dates: impl IntoIterator<Item = NaiveDate>,
) -> Result<(), SchemaError> {
    let mut prev: Option<NaiveDate> = None;
    for (index, date) in dates.into_iter().enumerate() {
        if prev.is_some_and(|p| date <= p) {
            return Err(SchemaError::NonIncreasingDates { index, date });
        }
        prev = Some(date);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn point(ts_ms: i64, close: Option<f64>, volume: Option<f64>) -> RawPricePoint {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(ts_ms).unwrap();
        RawPricePoint {
            timestamp,
            date: timestamp.date_naive(),
            close,
            volume,
        }
    }

    const JAN1_MS: i64 = 1_704_067_200_000;
    const DAY_MS: i64 = 86_400_000;

    #[test]
    fn close_fans_out_to_ohlc() {
        let records = normalize(&[point(JAN1_MS, Some(100.0), Some(5.0))]);
        let r = &records[0];
        assert_eq!(r.open, Some(100.0));
        assert_eq!(r.high, Some(100.0));
        assert_eq!(r.low, Some(100.0));
        assert_eq!(r.close, Some(100.0));
        assert_eq!(r.vol, Some(5.0));
        assert!(!r.missing_hours);
    }

    #[test]
    fn null_close_sets_missing_hours() {
        let records = normalize(&[point(JAN1_MS, None, Some(5.0))]);
        assert!(records[0].missing_hours);
        assert_eq!(records[0].open, None);
        assert_eq!(records[0].vol, Some(5.0));
    }

    #[test]
    fn truncates_to_utc_day_and_sorts() {
        // 23:30 UTC on Jan 2 stays on Jan 2
        let late = JAN1_MS + DAY_MS + 23 * 3_600_000 + 30 * 60_000;
        let records = normalize(&[point(late, Some(2.0), None), point(JAN1_MS, Some(1.0), None)]);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!(validate_daily(&records).is_ok());
    }

    #[test]
    fn duplicates_are_kept_in_parse_order_and_reported() {
        let records = normalize(&[
            point(JAN1_MS + DAY_MS, Some(3.0), None),
            point(JAN1_MS, Some(1.0), None),
            point(JAN1_MS + 3_600_000, Some(2.0), None),
        ]);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].close, Some(1.0));
        assert_eq!(records[1].close, Some(2.0));
        assert_eq!(
            duplicate_dates(&records),
            vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()]
        );
        assert!(matches!(
            validate_daily(&records),
            Err(SchemaError::NonIncreasingDates { index: 1, .. })
        ));
    }

    #[test]
    fn empty_series_is_valid() {
        assert!(normalize(&[]).is_empty());
        assert!(validate_daily(&[]).is_ok());
        assert!(duplicate_dates(&[]).is_empty());
    }
}
