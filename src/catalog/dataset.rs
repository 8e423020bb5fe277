//! Immutable in-memory datasets
//!
//! Column names are normalized once here so that every later lookup is
//! case- and whitespace-insensitive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::source::RawTable;
use crate::error::CatalogError;
use crate::types::parse_timestamp;

/// Inferred type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Every non-empty cell parses as an integer
    Integer,
    /// Every non-empty cell parses as a float
    Float,
    /// Every non-empty cell parses as a timestamp
    Timestamp,
    /// Anything else
    Text,
    /// No non-empty cell at all
    Empty,
}

impl ColumnType {
    /// True for integer and float columns
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut seen = false;
        let (mut integer, mut float, mut timestamp) = (true, true, true);

        for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
            seen = true;
            integer = integer && cell.parse::<i64>().is_ok();
            float = float && parse_number(cell).is_some();
            timestamp = timestamp && parse_timestamp(cell).is_some();
            if !integer && !float && !timestamp {
                return ColumnType::Text;
            }
        }

        if !seen {
            ColumnType::Empty
        } else if integer {
            ColumnType::Integer
        } else if float {
            ColumnType::Float
        } else if timestamp {
            ColumnType::Timestamp
        } else {
            ColumnType::Text
        }
    }
}

/// Parse a metric cell; `None` for empty, non-numeric and non-finite values
pub fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Canonical column/metric name: trimmed, lower-case, single spaces
pub fn normalize_column_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A named column with its inferred type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Canonical name
    pub name: String,
    /// Inferred type
    pub column_type: ColumnType,
}

/// A loaded table; never mutated after construction
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Build a dataset from a raw table, normalizing and typing the columns
    pub fn from_raw(name: &str, raw: RawTable) -> Result<Self, CatalogError> {
        let load_error = |reason: String| CatalogError::Load {
            name: name.to_string(),
            reason,
        };

        let names: Vec<String> = raw
            .headers
            .iter()
            .map(|h| normalize_column_name(h))
            .collect();
        if names.iter().all(String::is_empty) {
            return Err(load_error("no parseable column header".to_string()));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, column) in names.iter().enumerate() {
            if column.is_empty() {
                return Err(load_error(format!("column {} has an empty name", i + 1)));
            }
            if index.insert(column.clone(), i).is_some() {
                return Err(load_error(format!("duplicate column '{}'", column)));
            }
        }

        // custom sources may hand over ragged rows
        let width = names.len();
        let mut rows = raw.rows;
        for row in &mut rows {
            row.resize(width, String::new());
        }
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column {
                column_type: ColumnType::infer(rows.iter().map(|row| row[i].as_str())),
                name,
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            columns,
            index,
            rows,
        })
    }

    /// Dataset name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in source order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Position of a column, looked up by any spelling that normalizes to it
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(&normalize_column_name(name)).copied()
    }

    /// Check whether a column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Type of a column
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column_index(name).map(|i| self.columns[i].column_type)
    }

    /// True when at least one cell of the column parses as a finite number
    pub fn has_numeric_values(&self, name: &str) -> bool {
        self.column_index(name)
            .map(|i| self.rows.iter().any(|row| parse_number(&row[i]).is_some()))
            .unwrap_or(false)
    }

    /// All rows
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the dataset has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("  Predicted   Downtime "), "predicted downtime");
        assert_eq!(normalize_column_name("Inverter_ID"), "inverter_id");
    }

    #[test]
    fn test_type_inference() {
        let dataset = Dataset::from_raw(
            "t",
            raw(
                &["Timestamp", "Inverter_ID", "Count", "Score", "Notes", "Blank"],
                &[
                    &["2024-01-01 00:00:00", "A", "3", "0.5", "ok", ""],
                    &["2024-01-01 01:00:00", "B", "4", "n/a", "", ""],
                    &["2024-01-01 02:00:00", "C", "", "1", "x", ""],
                ],
            ),
        )
        .unwrap();

        assert_eq!(dataset.column_type("timestamp"), Some(ColumnType::Timestamp));
        assert_eq!(dataset.column_type("inverter_id"), Some(ColumnType::Text));
        assert_eq!(dataset.column_type("count"), Some(ColumnType::Integer));
        // a single unparsable cell demotes the column, the aggregator still coerces per row
        assert_eq!(dataset.column_type("score"), Some(ColumnType::Text));
        assert_eq!(dataset.column_type("blank"), Some(ColumnType::Empty));

        assert!(dataset.has_numeric_values("score"));
        assert!(!dataset.has_numeric_values("notes"));
        assert!(!dataset.has_numeric_values("missing"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let dataset =
            Dataset::from_raw("t", raw(&["Predicted Downtime"], &[&["1.0"]])).unwrap();
        assert_eq!(dataset.column_index("PREDICTED  downtime"), Some(0));
        assert!(dataset.has_column("predicted downtime"));
        assert!(!dataset.has_column("downtime"));
    }

    #[test]
    fn test_empty_header_rejected() {
        let err = Dataset::from_raw("t", raw(&[], &[])).unwrap_err();
        assert!(matches!(err, CatalogError::Load { .. }));

        let err = Dataset::from_raw("t", raw(&["", " "], &[])).unwrap_err();
        assert!(matches!(err, CatalogError::Load { .. }));
    }

    #[test]
    fn test_duplicate_normalized_columns_rejected() {
        let err = Dataset::from_raw("t", raw(&["Value", "value "], &[])).unwrap_err();
        match err {
            CatalogError::Load { reason, .. } => assert!(reason.contains("duplicate")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        // built by hand, bypassing RawTable::new
        let table = RawTable {
            headers: vec!["inverter_id".to_string(), "v".to_string()],
            rows: vec![
                vec!["A".to_string()],
                vec!["B".to_string(), "2".to_string(), "x".to_string()],
            ],
        };
        let dataset = Dataset::from_raw("t", table).unwrap();

        assert_eq!(dataset.rows()[0], vec!["A".to_string(), String::new()]);
        assert_eq!(dataset.rows()[1].len(), 2);
        assert!(dataset.has_numeric_values("v"));
    }

    #[test]
    fn test_parse_number_rejects_non_finite() {
        assert_eq!(parse_number(" 2.5 "), Some(2.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
    }
}
