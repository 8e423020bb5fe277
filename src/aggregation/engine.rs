//! Aggregation Engine
//!
//! Turns a selection plus filters into one mean per entity. The steps run in
//! a fixed order and each is a separate function:
//!
//! 1. [`coerce_metric`]: keep rows whose metric cell is a finite number
//! 2. [`attach_timestamps`]: parse the time column, dropping unparsable rows
//! 3. [`apply_filters`]: inclusive date bounds, then the entity filter
//! 4. [`group_means`]: per-entity mean, optionally through per-bucket means
//!
//! With a granularity, every bucket carries equal weight in the entity's
//! final value regardless of how many raw rows fell into it.
//!
//! Rows that fail coercion are dropped and counted, never read as zero.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::bucket::bucket_start;
use super::state::MeanState;
use super::{AggregateRow, AggregateTable, Aggregation, RowCounts};
use crate::catalog::{parse_number, Catalog, Dataset};
use crate::error::{AggregationError, EmptyReason};
use crate::types::{FilterSpec, Granularity, Selection, TimeBounds};

/// Placeholder column name reported when a dataset has no entity column
pub const ENTITY_COLUMN_PLACEHOLDER: &str = "entity id";

/// One row that survived metric coercion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    /// Trimmed entity id
    pub entity: &'a str,
    /// Metric value
    pub value: f64,
    /// Parsed timestamp, when the dataset has a time column
    pub timestamp: Option<i64>,
}

/// Step 1: keep rows whose metric parses as a finite number
pub fn coerce_metric(dataset: &Dataset, metric_idx: usize, entity_idx: usize) -> Vec<Sample<'_>> {
    dataset
        .rows()
        .iter()
        .filter_map(|row| {
            parse_number(&row[metric_idx]).map(|value| Sample {
                entity: row[entity_idx].trim(),
                value,
                timestamp: None,
            })
        })
        .collect()
}

/// Step 2: attach parsed timestamps; rows that do not parse are dropped
///
/// `samples` must come from [`coerce_metric`] over the same dataset, in order.
pub fn attach_timestamps<'a>(
    dataset: &'a Dataset,
    metric_idx: usize,
    timestamp_idx: usize,
    samples: Vec<Sample<'a>>,
) -> Vec<Sample<'a>> {
    let timestamps = dataset
        .rows()
        .iter()
        .filter(|row| parse_number(&row[metric_idx]).is_some())
        .map(|row| crate::types::parse_timestamp(&row[timestamp_idx]));

    samples
        .into_iter()
        .zip(timestamps)
        .filter_map(|(sample, ts)| {
            ts.map(|timestamp| Sample {
                timestamp: Some(timestamp),
                ..sample
            })
        })
        .collect()
}

/// Step 3: inclusive date bounds (timestamped samples only), then entity match
///
/// Samples with an empty entity id are always removed here.
pub fn apply_filters<'a>(
    samples: Vec<Sample<'a>>,
    bounds: &TimeBounds,
    entity: Option<&str>,
) -> Vec<Sample<'a>> {
    samples
        .into_iter()
        .filter(|s| !s.entity.is_empty())
        .filter(|s| s.timestamp.map_or(true, |ts| bounds.contains(ts)))
        .filter(|s| entity.map_or(true, |wanted| s.entity.to_lowercase() == wanted))
        .collect()
}

/// Step 4: per-entity means, two-stage when a granularity is given
///
/// Returns the final table and, for two-stage runs, the per-bucket means.
pub fn group_means(
    samples: &[Sample<'_>],
    granularity: Option<Granularity>,
) -> (AggregateTable, Vec<AggregateRow>) {
    let Some(granularity) = granularity else {
        let mut per_entity: BTreeMap<&str, MeanState> = BTreeMap::new();
        for sample in samples {
            per_entity.entry(sample.entity).or_default().add(sample.value);
        }
        let rows = per_entity
            .into_iter()
            .filter_map(|(entity, state)| {
                state.finalize().map(|value| AggregateRow::new(entity, value))
            })
            .collect();
        return (AggregateTable::from_sorted_rows(rows), Vec::new());
    };

    let mut per_bucket: BTreeMap<&str, BTreeMap<i64, MeanState>> = BTreeMap::new();
    for sample in samples {
        let Some(bucket) = sample.timestamp.and_then(|ts| bucket_start(granularity, ts)) else {
            continue;
        };
        per_bucket
            .entry(sample.entity)
            .or_default()
            .entry(bucket)
            .or_default()
            .add(sample.value);
    }

    let mut bucket_rows = Vec::new();
    let mut rows = Vec::with_capacity(per_bucket.len());
    for (entity, buckets) in per_bucket {
        let mut entity_state = MeanState::new();
        for (bucket, state) in buckets {
            if let Some(mean) = state.finalize() {
                entity_state.add(mean);
                bucket_rows.push(AggregateRow::new(entity, mean).with_bucket(bucket));
            }
        }
        if let Some(value) = entity_state.finalize() {
            rows.push(AggregateRow::new(entity, value));
        }
    }

    (AggregateTable::from_sorted_rows(rows), bucket_rows)
}

/// Computes per-entity aggregates over catalog datasets
///
/// Holds no state between calls; the same inputs always produce the same table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregationEngine;

impl AggregationEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self
    }

    /// Run every step for one selection
    pub fn aggregate(
        &self,
        catalog: &Catalog,
        selection: &Selection,
        filters: &FilterSpec,
    ) -> Result<Aggregation, AggregationError> {
        let dataset_name = selection.dataset();
        let dataset = catalog
            .dataset(dataset_name)
            .ok_or_else(|| AggregationError::NotFound(dataset_name.to_string()))?;
        let meta = catalog
            .describe(dataset_name)
            .map_err(|_| AggregationError::NotFound(dataset_name.to_string()))?;

        let missing = |column: &str| AggregationError::MissingColumn {
            dataset: meta.name.clone(),
            column: column.to_string(),
        };
        let metric_idx = dataset
            .column_index(selection.metric())
            .ok_or_else(|| missing(selection.metric()))?;
        let entity_column = meta
            .entity_column
            .as_deref()
            .ok_or_else(|| missing(ENTITY_COLUMN_PLACEHOLDER))?;
        let entity_idx = dataset
            .column_index(entity_column)
            .ok_or_else(|| missing(entity_column))?;
        let timestamp_idx = meta
            .timestamp_column
            .as_deref()
            .and_then(|c| dataset.column_index(c));

        let bounds = filters.time_bounds()?;
        let entity_filter = filters.normalized_entity();
        let empty = |reason: EmptyReason| AggregationError::EmptyResult {
            dataset: meta.name.clone(),
            metric: selection.metric().to_string(),
            reason,
        };

        let mut notes = Vec::new();
        let mut counts = RowCounts {
            scanned: dataset.len(),
            ..Default::default()
        };

        let samples = coerce_metric(&dataset, metric_idx, entity_idx);
        counts.non_numeric = counts.scanned - samples.len();
        if samples.is_empty() {
            return Err(empty(EmptyReason::NoNumericValues));
        }

        let samples = match timestamp_idx {
            Some(ts_idx) => {
                let before = samples.len();
                let samples = attach_timestamps(&dataset, metric_idx, ts_idx, samples);
                counts.bad_timestamp = before - samples.len();
                samples
            },
            None => {
                if !bounds.is_unbounded() {
                    warn!(dataset = %meta.name, "Date filters ignored: no timestamp column");
                    notes.push(
                        "Date filters ignored: dataset has no timestamp column.".to_string(),
                    );
                }
                samples
            },
        };

        let before = samples.len();
        let samples = apply_filters(samples, &bounds, entity_filter.as_deref());
        counts.filtered_out = before - samples.len();
        counts.used = samples.len();

        debug!(
            dataset = %meta.name,
            metric = %selection.metric(),
            scanned = counts.scanned,
            non_numeric = counts.non_numeric,
            bad_timestamp = counts.bad_timestamp,
            filtered_out = counts.filtered_out,
            used = counts.used,
            "Rows prepared for aggregation"
        );

        if samples.is_empty() {
            return Err(empty(EmptyReason::FilteredOut));
        }

        let granularity = match (filters.granularity, timestamp_idx) {
            (Some(g), Some(_)) => Some(g),
            (Some(g), None) => {
                warn!(
                    dataset = %meta.name,
                    granularity = %g,
                    "Granularity ignored: no timestamp column"
                );
                notes.push(format!(
                    "Granularity '{}' ignored: dataset has no timestamp column.",
                    g
                ));
                None
            },
            (None, _) => None,
        };

        let (table, buckets) = group_means(&samples, granularity);
        if table.is_empty() {
            return Err(empty(EmptyReason::FilteredOut));
        }

        Ok(Aggregation {
            selection: selection.clone(),
            table,
            buckets,
            granularity,
            entity_filter: filters.entity_id.clone(),
            entity_label: meta.entity_label.clone(),
            counts,
            notes,
        })
    }
}

/// Aggregate with a default engine, returning only the per-entity table
pub fn aggregate(
    catalog: &Catalog,
    selection: &Selection,
    filters: &FilterSpec,
) -> Result<AggregateTable, AggregationError> {
    AggregationEngine::new()
        .aggregate(catalog, selection, filters)
        .map(|aggregation| aggregation.table)
}
