//! Declared and resolved dataset metadata
//!
//! A [`DatasetDefinition`] is what an operator declares about a dataset
//! (keywords, key columns, preferred metrics). At catalog construction it is
//! checked against the loaded columns and frozen into a [`DatasetMetadata`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::dataset::{normalize_column_name, ColumnType, Dataset};
use crate::error::CatalogError;

/// Column name picked as the time axis when none is declared
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";

/// Declared metadata for one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDefinition {
    /// Registry name
    pub name: String,

    /// One-line description shown in the planner listing
    #[serde(default)]
    pub description: String,

    /// Free-text keywords that select this dataset
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Columns that identify a row (entity id, timestamp)
    #[serde(default)]
    pub key_columns: Vec<String>,

    /// Preferred metrics, in priority order
    #[serde(default)]
    pub metrics: Vec<String>,

    /// Entity column; defaults to the first non-timestamp key column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_column: Option<String>,

    /// Time column; defaults to `timestamp` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_column: Option<String>,

    /// Noun for one entity in summaries ("inverter")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_label: Option<String>,
}

impl DatasetDefinition {
    /// Create a definition with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the keywords
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the key columns
    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the preferred metrics
    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    /// Override the entity column
    pub fn with_entity_column(mut self, column: impl Into<String>) -> Self {
        self.entity_column = Some(column.into());
        self
    }

    /// Override the timestamp column
    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    /// Override the entity label
    pub fn with_entity_label(mut self, label: impl Into<String>) -> Self {
        self.entity_label = Some(label.into());
        self
    }
}

/// Resolved schema and metadata of a loaded dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Registry name
    pub name: String,
    /// Description for the planner listing
    pub description: String,
    /// Lower-case keywords
    pub keywords: Vec<String>,
    /// Column name to inferred type
    pub columns: BTreeMap<String, ColumnType>,
    /// Canonical key columns
    pub key_columns: Vec<String>,
    /// Metrics in match priority order; every entry is a column
    pub available_metrics: Vec<String>,
    /// Column grouped on during aggregation
    pub entity_column: Option<String>,
    /// Column used for time filters and buckets
    pub timestamp_column: Option<String>,
    /// Columns whose cells all parse as timestamps
    pub datetime_columns: Vec<String>,
    /// Singular noun for an entity
    pub entity_label: String,
    /// Number of rows loaded
    pub row_count: usize,
    /// First row, keyed by column
    pub preview: BTreeMap<String, String>,
}

impl DatasetMetadata {
    /// Check a definition against a loaded dataset
    ///
    /// Declared key, entity and timestamp columns must exist. Declared metrics
    /// that do not exist are dropped with a warning.
    pub fn resolve(
        definition: &DatasetDefinition,
        dataset: &Dataset,
    ) -> Result<Self, CatalogError> {
        let name = dataset.name().to_string();
        let require = |column: &str| -> Result<String, CatalogError> {
            let canonical = normalize_column_name(column);
            if dataset.has_column(&canonical) {
                Ok(canonical)
            } else {
                Err(CatalogError::MissingColumn {
                    dataset: name.clone(),
                    column: canonical,
                })
            }
        };

        let key_columns = definition
            .key_columns
            .iter()
            .map(|c| require(c))
            .collect::<Result<Vec<_>, _>>()?;

        let timestamp_column = match &definition.timestamp_column {
            Some(column) => Some(require(column)?),
            None if dataset.has_column(DEFAULT_TIMESTAMP_COLUMN) => {
                Some(DEFAULT_TIMESTAMP_COLUMN.to_string())
            },
            None => key_columns
                .iter()
                .find(|c| dataset.column_type(c) == Some(ColumnType::Timestamp))
                .cloned(),
        };

        let entity_column = match &definition.entity_column {
            Some(column) => Some(require(column)?),
            None => key_columns
                .iter()
                .find(|c| Some(*c) != timestamp_column.as_ref())
                .cloned(),
        };

        let mut available_metrics = Vec::new();
        for metric in &definition.metrics {
            let canonical = normalize_column_name(metric);
            if !dataset.has_column(&canonical) {
                warn!(
                    dataset = %name,
                    metric = %canonical,
                    "Declared metric not in source columns, skipping"
                );
                continue;
            }
            if !available_metrics.contains(&canonical) {
                available_metrics.push(canonical);
            }
        }

        let is_key = |c: &String| {
            key_columns.contains(c)
                || Some(c) == timestamp_column.as_ref()
                || Some(c) == entity_column.as_ref()
        };
        for column in dataset.columns() {
            if is_key(&column.name) || available_metrics.contains(&column.name) {
                continue;
            }
            let numeric = column.column_type.is_numeric()
                || (column.column_type == ColumnType::Text
                    && dataset.has_numeric_values(&column.name));
            if numeric {
                available_metrics.push(column.name.clone());
            }
        }

        let columns = dataset
            .columns()
            .iter()
            .map(|c| (c.name.clone(), c.column_type))
            .collect();

        let datetime_columns = dataset
            .columns()
            .iter()
            .filter(|c| c.column_type == ColumnType::Timestamp)
            .map(|c| c.name.clone())
            .collect();

        let preview = dataset
            .rows()
            .first()
            .map(|row| {
                dataset
                    .columns()
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.name.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let entity_label = definition
            .entity_label
            .clone()
            .unwrap_or_else(|| derive_entity_label(entity_column.as_deref()));

        Ok(Self {
            name,
            description: definition.description.clone(),
            keywords: definition
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            columns,
            key_columns,
            available_metrics,
            entity_column,
            timestamp_column,
            datetime_columns,
            entity_label,
            row_count: dataset.len(),
            preview,
        })
    }

    /// Check whether a metric is available (any spelling that normalizes to it)
    pub fn has_metric(&self, metric: &str) -> bool {
        let canonical = normalize_column_name(metric);
        self.available_metrics.contains(&canonical)
    }

    /// First available metric
    pub fn primary_metric(&self) -> Option<&str> {
        self.available_metrics.first().map(String::as_str)
    }
}

/// `inverter_id` becomes `inverter`; no entity column gives `entity`
fn derive_entity_label(entity_column: Option<&str>) -> String {
    let Some(column) = entity_column else {
        return "entity".to_string();
    };
    let stem = column
        .strip_suffix("_id")
        .or_else(|| column.strip_suffix(" id"))
        .unwrap_or(column);
    let label = stem.replace('_', " ").trim().to_string();
    if label.is_empty() {
        "entity".to_string()
    } else {
        label
    }
}
