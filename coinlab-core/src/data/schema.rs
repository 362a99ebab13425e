use chrono::NaiveDate;
use polars::prelude::*;

/// Column names of the per-asset daily table, in write order (after `date`).
pub const DAILY_COLUMNS: [&str; 6] = ["open", "high", "low", "close", "vol", "missing_hours"];

/// Column names of the index table, in write order.
pub const INDEX_COLUMNS: [&str; 4] = ["date", "index_level", "divisor", "notes"];

/// Expected schema for the per-asset daily table
pub struct DailySchema;

impl DailySchema {
    /// Get the canonical daily schema
    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new("date".into(), DataType::Date),
            Field::new("open".into(), DataType::Float64),
            Field::new("high".into(), DataType::Float64),
            Field::new("low".into(), DataType::Float64),
            Field::new("close".into(), DataType::Float64),
            Field::new("vol".into(), DataType::Float64),
            Field::new("missing_hours".into(), DataType::Boolean),
        ])
    }

    /// Schema of a merged table: `date` plus every daily column under both prefixes.
    pub fn merged_schema(left: &str, right: &str) -> Schema {
        let daily = Self::schema();
        let mut fields = vec![Field::new("date".into(), DataType::Date)];
        for prefix in [left, right] {
            for field in daily.iter_fields().filter(|f| f.name().as_str() != "date") {
                fields.push(Field::new(
                    format!("{prefix}_{}", field.name()).into(),
                    field.dtype().clone(),
                ));
            }
        }
        Schema::from_iter(fields)
    }

    /// Validate DataFrame against the daily schema
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        validate_against(df, &Self::schema())
    }

    /// Validate DataFrame against the merged schema for a prefix pair
    pub fn validate_merged(df: &DataFrame, left: &str, right: &str) -> Result<(), SchemaError> {
        validate_against(df, &Self::merged_schema(left, right))
    }
}

fn validate_against(df: &DataFrame, expected: &Schema) -> Result<(), SchemaError> {
    for field in expected.iter_fields() {
        let column = df
            .column(field.name().as_str())
            .map_err(|_| SchemaError::MissingColumn(field.name().to_string()))?;
        if column.dtype() != field.dtype() {
            return Err(SchemaError::TypeMismatch {
                column: field.name().to_string(),
                expected: field.dtype().clone(),
                actual: column.dtype().clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("Dates must be strictly increasing: row {index} has {date}")]
    NonIncreasingDates { index: usize, date: NaiveDate },

    #[error("Column prefix '{0}' used for both sides of a merge")]
    ColumnCollision(String),

    #[error("Null close on {date} rejected by the null-return policy")]
    NullClose { date: NaiveDate },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("date".into(), &[19723i32]).cast(&DataType::Date).unwrap(),
            Column::new("open".into(), &[42000.0]),
            Column::new("high".into(), &[42000.0]),
            Column::new("low".into(), &[42000.0]),
            Column::new("close".into(), &[42000.0]),
            Column::new("vol".into(), &[1.5e10]),
            Column::new("missing_hours".into(), &[false]),
        ])
        .unwrap()
    }

    #[test]
    fn test_schema_has_all_required_columns() {
        let schema = DailySchema::schema();
        assert!(schema.contains("date"));
        for col in DAILY_COLUMNS {
            assert!(schema.contains(col), "missing {col}");
        }
    }

    #[test]
    fn test_merged_schema_prefixes_both_sides() {
        let schema = DailySchema::merged_schema("btc", "eth");
        assert_eq!(schema.len(), 1 + 2 * DAILY_COLUMNS.len());
        assert!(schema.contains("btc_close"));
        assert!(schema.contains("eth_missing_hours"));
        assert!(!schema.contains("close"));
    }

    #[test]
    fn test_validate_accepts_valid_dataframe() {
        assert!(DailySchema::validate(&daily_frame()).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_column() {
        let df = daily_frame().drop("vol").unwrap();
        match DailySchema::validate(&df) {
            Err(SchemaError::MissingColumn(col)) => assert_eq!(col, "vol"),
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_wrong_dtype() {
        let mut df = daily_frame();
        df.with_column(Column::new("missing_hours".into(), &[0i32]))
            .unwrap();
        assert!(matches!(
            DailySchema::validate(&df),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }
}
