//! Buy-and-hold index construction.
//!
//! Rebases a close-price series into a cumulative-return index that starts at
//! `base`. Each day's return is measured against the most recent non-null
//! close, so a gap carries the level forward and the next valid close picks
//! up the full move across the gap.

use crate::data::normalize::DailyRecord;
use crate::data::schema::SchemaError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default starting level.
pub const DEFAULT_BASE: f64 = 1000.0;

/// One row of the index table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(with = "iso_date")]
    pub date: NaiveDate,
    pub index_level: f64,
    /// Constant at `base`; reserved for later level adjustments.
    pub divisor: f64,
    pub notes: String,
}

/// Handling of days whose return cannot be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullReturnPolicy {
    /// Treat the return as 0.0 and carry the level forward.
    #[default]
    ZeroFill,
    /// Fail on the first null close.
    Reject,
}

/// Build the index for `series`. One output row per input row, same order.
pub fn build_index(
    series: &[DailyRecord],
    base: f64,
    policy: NullReturnPolicy,
) -> Result<Vec<IndexRecord>, SchemaError> {
    let mut out = Vec::with_capacity(series.len());
    let mut level = base;
    let mut reference: Option<f64> = None;

    for (i, record) in series.iter().enumerate() {
        if record.close.is_none() && policy == NullReturnPolicy::Reject {
            return Err(SchemaError::NullClose { date: record.date });
        }

        if i > 0 {
            let ret = match (record.close, reference) {
                (Some(close), Some(prev)) if prev != 0.0 => close / prev - 1.0,
                _ => 0.0,
            };
            level *= 1.0 + ret;
        }
        if record.close.is_some() {
            reference = record.close;
        }

        out.push(IndexRecord {
            date: record.date,
            index_level: level,
            divisor: base,
            notes: String::new(),
        });
    }

    Ok(out)
}

mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&date.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
