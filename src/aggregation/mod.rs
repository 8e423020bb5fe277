//! Per-Entity Aggregation
//!
//! Reduces a dataset's rows to one mean value per entity for the selected
//! metric, honoring date-range, entity and granularity filters.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Dataset rows + filters       │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │   Coerce metric, parse timestamps   │
//! │   drop what fails, count the drops  │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │     Date bounds + entity filter     │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │  Mean per (entity, bucket), then    │
//! │  mean of bucket means per entity    │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │  AggregateTable (sorted by entity)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! Without a granularity, the second stage collapses into a plain mean over
//! all surviving rows of the entity.

pub mod bucket;
pub mod engine;
pub mod state;

pub use bucket::bucket_start;
pub use engine::{aggregate, AggregationEngine};
pub use state::MeanState;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{format_timestamp, Granularity, Selection};

// ============================================================================
// Output Types
// ============================================================================

/// One aggregated value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    /// Entity identifier as it appears in the data
    pub entity_id: String,

    /// Mean of the metric
    pub value: f64,

    /// Bucket start (ms since epoch) for intermediate per-bucket rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<i64>,
}

impl AggregateRow {
    /// Create a row without a bucket
    pub fn new(entity_id: impl Into<String>, value: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            value,
            bucket: None,
        }
    }

    /// Attach a bucket start
    pub fn with_bucket(mut self, bucket: i64) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Bucket start rendered as text
    pub fn bucket_label(&self) -> Option<String> {
        self.bucket.map(format_timestamp)
    }
}

/// One row per entity, ordered by entity id
///
/// Entity ids are unique and every value is finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregateTable {
    rows: Vec<AggregateRow>,
}

impl AggregateTable {
    /// Caller guarantees unique, ascending entity ids
    pub(crate) fn from_sorted_rows(rows: Vec<AggregateRow>) -> Self {
        Self { rows }
    }

    /// Build a table from `(entity, value)` pairs
    ///
    /// Non-finite values are skipped. A repeated entity keeps its last value.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let map: BTreeMap<String, f64> = values
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(e, v)| (e.into(), v))
            .collect();
        Self {
            rows: map
                .into_iter()
                .map(|(entity, value)| AggregateRow::new(entity, value))
                .collect(),
        }
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no entities
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in entity order
    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    /// Iterate rows in entity order
    pub fn iter(&self) -> impl Iterator<Item = &AggregateRow> {
        self.rows.iter()
    }

    /// Entity ids in order
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.entity_id.as_str())
    }

    /// Value of one entity (exact id match)
    pub fn get(&self, entity_id: &str) -> Option<f64> {
        self.rows
            .binary_search_by(|r| r.entity_id.as_str().cmp(entity_id))
            .ok()
            .map(|i| self.rows[i].value)
    }
}

impl<'a> IntoIterator for &'a AggregateTable {
    type Item = &'a AggregateRow;
    type IntoIter = std::slice::Iter<'a, AggregateRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// How many rows each step consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    /// Rows in the dataset
    pub scanned: usize,
    /// Dropped because the metric cell was not a finite number
    pub non_numeric: usize,
    /// Dropped because the timestamp did not parse
    pub bad_timestamp: usize,
    /// Removed by date, entity or empty-entity filtering
    pub filtered_out: usize,
    /// Rows that reached grouping
    pub used: usize,
}

/// Full output of the aggregation stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    /// What was aggregated
    pub selection: Selection,
    /// Final per-entity values
    pub table: AggregateTable,
    /// Per-(entity, bucket) means; empty unless a granularity was applied
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<AggregateRow>,
    /// Granularity actually applied
    pub granularity: Option<Granularity>,
    /// Entity filter as supplied
    pub entity_filter: Option<String>,
    /// Singular noun for one entity, e.g. `inverter`
    pub entity_label: String,
    /// Row accounting
    pub counts: RowCounts,
    /// Filters that could not be applied
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Aggregation {
    /// One-line description of what was computed
    pub fn summary(&self) -> String {
        let scope = match &self.entity_filter {
            Some(entity) => format!("{} '{}'", self.entity_label, entity.trim()),
            None => format!("{}(s)", self.entity_label),
        };
        let grouping = match self.granularity {
            Some(g) => format!("by {}", g),
            None => "over all matching rows".to_string(),
        };
        let mut summary = format!(
            "Aggregated '{}' {} for {}.",
            self.selection.metric(),
            grouping,
            scope
        );
        for note in &self.notes {
            summary.push(' ');
            summary.push_str(note);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_values_sorts_and_skips_non_finite() {
        let table = AggregateTable::from_values([("b", 2.0), ("a", 1.0), ("c", f64::NAN)]);
        assert_eq!(table.entities().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(table.get("b"), Some(2.0));
        assert_eq!(table.get("c"), None);
    }

    #[test]
    fn test_summary_wording() {
        let mut aggregation = Aggregation {
            selection: Selection::new_unchecked("performance", "predicted downtime"),
            table: AggregateTable::default(),
            buckets: Vec::new(),
            granularity: Some(Granularity::Hour),
            entity_filter: None,
            entity_label: "inverter".to_string(),
            counts: RowCounts::default(),
            notes: Vec::new(),
        };
        assert_eq!(
            aggregation.summary(),
            "Aggregated 'predicted downtime' by hour for inverter(s)."
        );

        aggregation.granularity = None;
        aggregation.entity_filter = Some("INV-7".to_string());
        assert_eq!(
            aggregation.summary(),
            "Aggregated 'predicted downtime' over all matching rows for inverter 'INV-7'."
        );
    }

    #[test]
    fn test_bucket_label() {
        let row = AggregateRow::new("a", 1.0).with_bucket(0);
        assert_eq!(row.bucket_label().as_deref(), Some(&*format_timestamp(0)));
    }
}
