//! Two-asset inner join on date.
//!
//! Unlike a union alignment, dates missing from either side are dropped, so
//! no void rows are ever produced. Every column is namespaced by its source
//! prefix (`btc_close`, `eth_vol`, ...).

use super::normalize::{ensure_increasing, DailyRecord};
use super::schema::{SchemaError, DAILY_COLUMNS};
use chrono::NaiveDate;
use std::cmp::Ordering;

/// One joined row.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub date: NaiveDate,
    pub left: DailyRecord,
    pub right: DailyRecord,
}

/// Result of [`merge`]: rows plus the prefixes that namespace them.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSeries {
    pub left_prefix: String,
    pub right_prefix: String,
    pub rows: Vec<MergedRecord>,
}

impl MergedSeries {
    /// Column names after `date`: left columns, then right columns.
    pub fn column_names(&self) -> Vec<String> {
        [&self.left_prefix, &self.right_prefix]
            .iter()
            .flat_map(|prefix| DAILY_COLUMNS.iter().map(move |c| format!("{prefix}_{c}")))
            .collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.date).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Inner-join two daily series on date.
///
/// Both inputs must have strictly increasing dates, and the prefixes must
/// differ so the output columns cannot collide.
pub fn merge(
    left: &[DailyRecord],
    left_prefix: &str,
    right: &[DailyRecord],
    right_prefix: &str,
) -> Result<MergedSeries, SchemaError> {
    if left_prefix == right_prefix {
        return Err(SchemaError::ColumnCollision(left_prefix.to_string()));
    }
    ensure_increasing(left.iter().map(|r| r.date))?;
    ensure_increasing(right.iter().map(|r| r.date))?;

    // Both sides are sorted: walk them together.
    let mut rows = Vec::with_capacity(left.len().min(right.len()));
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].date.cmp(&right[j].date) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                rows.push(MergedRecord {
                    date: left[i].date,
                    left: left[i].clone(),
                    right: right[j].clone(),
                });
                i += 1;
                j += 1;
            }
        }
    }

    Ok(MergedSeries {
        left_prefix: left_prefix.to_string(),
        right_prefix: right_prefix.to_string(),
        rows,
    })
}
