//! Kuba Insights - query-driven analytics over tabular time-series data
//!
//! This library answers structured analytical questions such as "which
//! inverter performs worst on downtime this month?" with:
//! - A read-only dataset catalog with schema metadata and metric aliases
//! - Keyword-based resolution of free text to a `(dataset, metric)` pair
//! - Per-entity mean aggregation with optional time bucketing
//! - Ranking with a metric-aware sort direction
//! - A per-request pipeline that reports which stage failed and why

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Dataset registry built once from tabular sources
pub mod catalog;

/// Free-text query resolution
pub mod interpreter;

/// Per-entity aggregation with optional time buckets
pub mod aggregation;

/// Direction-aware ranking of aggregated entities
pub mod ranking;

/// Per-request orchestration of the stages
pub mod pipeline;

// Re-export main types
pub use aggregation::{AggregateRow, AggregateTable, AggregationEngine};
pub use catalog::{Catalog, CatalogBuilder, DatasetDefinition, DatasetMetadata};
pub use config::Config;
pub use error::{Error, Result};
pub use interpreter::QueryInterpreter;
pub use pipeline::{answer, Answer, Pipeline, PipelineContext, Stage, StageFailure};
pub use ranking::{Direction, RankingEngine, RankingResult};
pub use types::{FilterSpec, Granularity, Selection};
