//! Dataset Catalog
//!
//! The process-wide, read-only registry of loaded datasets. It is built once
//! from a list of named tabular sources and then shared (typically behind an
//! `Arc`) by every query. Nothing in the catalog is mutable after `build`.
//!
//! ```text
//! ┌──────────────────┐   read    ┌──────────┐  resolve   ┌──────────────────┐
//! │ TabularSource(s) │──────────▶│ Dataset  │───────────▶│ DatasetMetadata  │
//! └──────────────────┘           └──────────┘            └──────────────────┘
//!                                                                 │
//!                                                        ┌────────▼─────────┐
//!                                                        │  metric aliases  │
//!                                                        └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_insights::catalog::{Catalog, DatasetDefinition, InMemorySource};
//!
//! let catalog = Catalog::builder()
//!     .add_source(
//!         DatasetDefinition::new("performance")
//!             .with_keywords(["downtime"])
//!             .with_key_columns(["timestamp", "inverter_id"]),
//!         InMemorySource::new(
//!             ["timestamp", "inverter_id", "predicted_downtime"],
//!             vec![vec!["2024-01-01 00:00:00", "A", "1.0"]],
//!         ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let meta = catalog.describe("performance").unwrap();
//! assert_eq!(meta.available_metrics, vec!["predicted_downtime"]);
//! assert!(catalog.lookup_metric("predicted downtime").is_some());
//! ```

pub mod dataset;
pub mod metadata;
pub mod source;

pub use dataset::{normalize_column_name, parse_number, Column, ColumnType, Dataset};
pub use metadata::{DatasetDefinition, DatasetMetadata, DEFAULT_TIMESTAMP_COLUMN};
pub use source::{CsvSource, InMemorySource, RawTable, TabularSource};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::CatalogError;
use crate::types::Selection;

/// A definition paired with the source that supplies its rows
pub struct DatasetSource {
    /// Declared metadata
    pub definition: DatasetDefinition,
    /// Row supplier
    pub source: Box<dyn TabularSource>,
}

impl DatasetSource {
    /// Pair a definition with a source
    pub fn new(definition: DatasetDefinition, source: impl TabularSource + 'static) -> Self {
        Self {
            definition,
            source: Box::new(source),
        }
    }
}

impl fmt::Debug for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetSource")
            .field("name", &self.definition.name)
            .field("origin", &self.source.origin())
            .finish()
    }
}

/// One alias in the metric index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricEntry {
    /// Alias as matched against query text (lower-case)
    pub alias: String,
    /// Owning dataset
    pub dataset: String,
    /// Canonical metric column
    pub metric: String,
}

#[derive(Debug)]
struct CatalogEntry {
    dataset: Arc<Dataset>,
    metadata: DatasetMetadata,
    aliases: Vec<MetricEntry>,
}

/// Read-only registry of datasets in registration order
#[derive(Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Start building a catalog
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Load every source, in order; fails on the first unreadable one
    pub fn load(sources: Vec<DatasetSource>) -> Result<Self, CatalogError> {
        sources
            .into_iter()
            .fold(CatalogBuilder::new(), |builder, s| builder.push(s))
            .build()
    }

    /// Number of datasets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no dataset is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dataset names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.metadata.name.as_str())
    }

    /// Metadata of every dataset in registration order
    pub fn datasets(&self) -> impl Iterator<Item = &DatasetMetadata> {
        self.entries.iter().map(|e| &e.metadata)
    }

    fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name
            .get(&canonical_dataset_name(name))
            .map(|&i| &self.entries[i])
    }

    /// Metadata of one dataset
    pub fn describe(&self, name: &str) -> Result<&DatasetMetadata, CatalogError> {
        self.entry(name)
            .map(|e| &e.metadata)
            .ok_or_else(|| CatalogError::NotFound(format!("Dataset '{}'", name)))
    }

    /// Rows of one dataset
    pub fn dataset(&self, name: &str) -> Option<Arc<Dataset>> {
        self.entry(name).map(|e| Arc::clone(&e.dataset))
    }

    /// Build a checked selection; `metric` may be any alias of the column
    pub fn selection(&self, dataset: &str, metric: &str) -> Result<Selection, CatalogError> {
        let entry = self
            .entry(dataset)
            .ok_or_else(|| CatalogError::NotFound(format!("Dataset '{}'", dataset)))?;

        let wanted = alias_key(metric);
        entry
            .aliases
            .iter()
            .find(|a| a.alias == wanted)
            .map(|a| Selection::new_unchecked(a.dataset.clone(), a.metric.clone()))
            .ok_or_else(|| {
                CatalogError::NotFound(format!(
                    "Metric '{}' in dataset '{}'",
                    metric, entry.metadata.name
                ))
            })
    }

    /// Aliases of one dataset's metrics, in metric priority order
    pub fn metric_aliases(&self, dataset: &str) -> &[MetricEntry] {
        self.entry(dataset)
            .map(|e| e.aliases.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve a metric alias across all datasets (first registered wins)
    pub fn lookup_metric(&self, alias: &str) -> Option<&MetricEntry> {
        let wanted = alias_key(alias);
        self.entries
            .iter()
            .flat_map(|e| e.aliases.iter())
            .find(|a| a.alias == wanted)
    }

    /// Dataset listing for a planning layer
    pub fn planner_prompt(&self) -> String {
        let mut prompt = String::from("You can choose from the following datasets:");
        for meta in self.datasets() {
            prompt.push_str(&format!("\n- {}: {}", meta.name, meta.description));
        }
        prompt
    }
}

/// Incremental catalog construction
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    sources: Vec<DatasetSource>,
}

impl CatalogBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition with its source
    pub fn add_source(
        self,
        definition: DatasetDefinition,
        source: impl TabularSource + 'static,
    ) -> Self {
        self.push(DatasetSource::new(definition, source))
    }

    /// Register an already paired source
    pub fn push(mut self, source: DatasetSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Read every source and freeze the catalog
    pub fn build(self) -> Result<Catalog, CatalogError> {
        let mut catalog = Catalog::default();

        for DatasetSource { definition, source } in self.sources {
            let name = canonical_dataset_name(&definition.name);
            if name.is_empty() {
                return Err(CatalogError::Load {
                    name: definition.name.clone(),
                    reason: "dataset name is empty".to_string(),
                });
            }
            if catalog.by_name.contains_key(&name) {
                return Err(CatalogError::DuplicateDataset(name));
            }

            let origin = source.origin();
            let raw = source.read().map_err(|reason| CatalogError::Load {
                name: name.clone(),
                reason,
            })?;

            let dataset = Dataset::from_raw(&name, raw)?;
            let metadata = DatasetMetadata::resolve(&definition, &dataset)?;
            let aliases = build_aliases(&metadata);

            info!(
                dataset = %name,
                origin = %origin,
                rows = dataset.len(),
                columns = dataset.columns().len(),
                metrics = metadata.available_metrics.len(),
                "Dataset registered"
            );
            debug!(dataset = %name, metrics = ?metadata.available_metrics, "Available metrics");

            catalog.by_name.insert(name, catalog.entries.len());
            catalog.entries.push(CatalogEntry {
                dataset: Arc::new(dataset),
                metadata,
                aliases,
            });
        }

        Ok(catalog)
    }
}

fn canonical_dataset_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Key used for alias comparison: normalized, underscores read as spaces
fn alias_key(text: &str) -> String {
    normalize_column_name(&text.replace('_', " "))
}

/// Canonical name first, then its underscore/space variants
fn build_aliases(metadata: &DatasetMetadata) -> Vec<MetricEntry> {
    let mut aliases: Vec<MetricEntry> = Vec::new();
    for metric in &metadata.available_metrics {
        let variants = [
            metric.clone(),
            alias_key(metric),
            metric.replace(' ', "_"),
        ];
        for variant in variants {
            if aliases.iter().any(|a| a.alias == variant) {
                continue;
            }
            aliases.push(MetricEntry {
                alias: variant,
                dataset: metadata.name.clone(),
                metric: metric.clone(),
            });
        }
    }
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> Catalog {
        Catalog::builder()
            .add_source(
                DatasetDefinition::new("Performance")
                    .with_description("Predicted and actual inverter downtimes.")
                    .with_keywords(["downtime", "failure"])
                    .with_key_columns(["timestamp", "inverter_id"])
                    .with_metrics(["predicted downtime"]),
                InMemorySource::new(
                    ["timestamp", "inverter_id", "predicted downtime", "error_rate"],
                    vec![vec!["2024-01-01 00:00:00", "A", "1.0", "0.5"]],
                ),
            )
            .add_source(
                DatasetDefinition::new("features")
                    .with_description("Feature importance scores.")
                    .with_keywords(["feature"])
                    .with_key_columns(["feature_name"]),
                InMemorySource::new(["feature_name", "importance"], vec![vec!["temp", "0.4"]]),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_registration_order_and_case() {
        let catalog = sample_catalog();
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["performance", "features"]);
        assert!(catalog.describe("PERFORMANCE").is_ok());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_describe_not_found() {
        let err = sample_catalog().describe("weather").unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_selection_accepts_aliases() {
        let catalog = sample_catalog();

        let selection = catalog.selection("performance", "Predicted_Downtime").unwrap();
        assert_eq!(selection.dataset(), "performance");
        assert_eq!(selection.metric(), "predicted downtime");

        let selection = catalog.selection("performance", "error rate").unwrap();
        assert_eq!(selection.metric(), "error_rate");

        assert!(catalog.selection("performance", "importance").is_err());
        assert!(catalog.selection("weather", "importance").is_err());
    }

    #[test]
    fn test_lookup_metric_across_datasets() {
        let catalog = sample_catalog();
        let entry = catalog.lookup_metric("importance").unwrap();
        assert_eq!(entry.dataset, "features");
        assert!(catalog.lookup_metric("humidity").is_none());
    }

    #[test]
    fn test_duplicate_dataset_rejected() {
        let empty = || InMemorySource::new(["x"], Vec::<Vec<&str>>::new());
        let err = Catalog::builder()
            .add_source(DatasetDefinition::new("a"), empty())
            .add_source(DatasetDefinition::new(" A "), empty())
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateDataset(name) if name == "a"));
    }

    #[test]
    fn test_unreadable_source_is_load_error() {
        let err = Catalog::load(vec![DatasetSource::new(
            DatasetDefinition::new("performance"),
            CsvSource::from_path("/no/such/file.csv"),
        )])
        .unwrap_err();
        assert!(matches!(err, CatalogError::Load { name, .. } if name == "performance"));
    }

    #[test]
    fn test_planner_prompt_lists_descriptions() {
        let prompt = sample_catalog().planner_prompt();
        assert!(prompt.starts_with("You can choose from the following datasets:"));
        assert!(prompt.contains("- performance: Predicted and actual inverter downtimes."));
        assert!(prompt.contains("- features: Feature importance scores."));
    }

    #[test]
    fn test_aliases_deduplicated() {
        let catalog = sample_catalog();
        let aliases: Vec<_> = catalog
            .metric_aliases("performance")
            .iter()
            .map(|a| a.alias.as_str())
            .collect();
        assert_eq!(
            aliases,
            vec![
                "predicted downtime",
                "predicted_downtime",
                "error_rate",
                "error rate"
            ]
        );
    }
}
