//! Error types for the analytics pipeline
//!
//! Each pipeline stage owns an error enum. The orchestrator converts whichever
//! one fires into a [`crate::pipeline::StageFailure`], and only there is the
//! error rendered to a user-facing sentence via `user_message()`.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Catalog construction or lookup error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Query interpretation error
    #[error("Interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),

    /// Aggregation error
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Ranking error
    #[error("Ranking error: {0}")]
    Ranking(#[from] RankingError),

    /// A stage ran before the stage that feeds it
    #[error("Pipeline stage '{0}' ran without its input")]
    MissingStageInput(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Short sentence suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            Error::Catalog(e) => e.user_message(),
            Error::Interpreter(e) => e.user_message(),
            Error::Aggregation(e) => e.user_message(),
            Error::Ranking(e) => e.user_message(),
            Error::MissingStageInput(_) => "The analysis could not be completed.".to_string(),
            Error::Configuration(msg) => format!("Configuration problem: {}.", msg),
            Error::Io(_) => "A data source could not be read.".to_string(),
            Error::Serialization(_) => "The result could not be serialized.".to_string(),
        }
    }
}

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// A source could not be read or has no usable header
    #[error("Failed to load dataset '{name}': {reason}")]
    Load {
        /// Dataset name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Dataset or metric is not registered
    #[error("Not found: {0}")]
    NotFound(String),

    /// A declared key column is absent from the source header
    #[error("Column '{column}' missing from dataset '{dataset}'")]
    MissingColumn {
        /// Dataset name
        dataset: String,
        /// Canonical column name
        column: String,
    },

    /// Two sources registered under the same name
    #[error("Dataset '{0}' registered more than once")]
    DuplicateDataset(String),
}

impl CatalogError {
    /// Short sentence suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            CatalogError::Load { name, .. } => format!("Dataset '{}' could not be loaded.", name),
            CatalogError::NotFound(what) => format!("{} was not found.", what),
            CatalogError::MissingColumn { dataset, column } => {
                format!("Column '{}' not found in dataset '{}'.", column, dataset)
            },
            CatalogError::DuplicateDataset(name) => {
                format!("Dataset '{}' is defined more than once.", name)
            },
        }
    }
}

/// Query interpretation errors
///
/// Interpretation always resolves to a default selection, so the only failure
/// is having nothing to select from.
#[derive(Error, Debug)]
pub enum InterpreterError {
    /// The catalog holds no dataset with at least one metric
    #[error("No datasets available")]
    NoDatasetsAvailable,
}

impl InterpreterError {
    /// Short sentence suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            InterpreterError::NoDatasetsAvailable => "No datasets are loaded.".to_string(),
        }
    }
}

/// Why an aggregation produced no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The metric column holds no parsable number at all
    NoNumericValues,
    /// Timestamp, date-range or entity filtering removed every row
    FilteredOut,
}

/// Aggregation errors
#[derive(Error, Debug)]
pub enum AggregationError {
    /// Dataset named by the selection is not in the catalog
    #[error("Dataset '{0}' not found")]
    NotFound(String),

    /// Metric or required key column absent
    #[error("Column '{column}' missing from dataset '{dataset}'")]
    MissingColumn {
        /// Dataset name
        dataset: String,
        /// Column name
        column: String,
    },

    /// No rows survived coercion and filtering
    #[error("Empty result for '{metric}' in dataset '{dataset}' ({reason:?})")]
    EmptyResult {
        /// Dataset name
        dataset: String,
        /// Metric column
        metric: String,
        /// Which step eliminated the rows
        reason: EmptyReason,
    },

    /// A filter value could not be parsed
    #[error("Cannot parse {field} value '{value}'")]
    UnparsableFilter {
        /// Filter field name (`start_date`, `end_date`)
        field: &'static str,
        /// The raw value supplied
        value: String,
    },
}

impl AggregationError {
    /// Short sentence suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            AggregationError::NotFound(name) => format!("Dataset '{}' was not found.", name),
            AggregationError::MissingColumn { dataset, column } => {
                format!("Column '{}' not found in dataset '{}'.", column, dataset)
            },
            AggregationError::EmptyResult {
                reason: EmptyReason::FilteredOut,
                ..
            } => "No data available after filtering.".to_string(),
            AggregationError::EmptyResult {
                dataset,
                metric,
                reason: EmptyReason::NoNumericValues,
            } => format!(
                "No numeric values found for '{}' in dataset '{}'.",
                metric, dataset
            ),
            AggregationError::UnparsableFilter { field, value } => {
                format!("Could not understand {} '{}' as a date.", field, value)
            },
        }
    }
}

/// Ranking errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RankingError {
    /// The aggregate table has no rows
    #[error("Cannot rank an empty aggregate table")]
    EmptyInput,
}

impl RankingError {
    /// Short sentence suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            RankingError::EmptyInput => "There is nothing to rank.".to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_out_message() {
        let err = Error::from(AggregationError::EmptyResult {
            dataset: "performance".to_string(),
            metric: "predicted downtime".to_string(),
            reason: EmptyReason::FilteredOut,
        });
        assert_eq!(err.user_message(), "No data available after filtering.");
    }

    #[test]
    fn test_no_numeric_message_names_metric() {
        let err = AggregationError::EmptyResult {
            dataset: "performance".to_string(),
            metric: "status".to_string(),
            reason: EmptyReason::NoNumericValues,
        };
        assert!(err.user_message().contains("'status'"));
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = RankingError::EmptyInput.into();
        assert!(matches!(err, Error::Ranking(RankingError::EmptyInput)));

        let err: Error = InterpreterError::NoDatasetsAvailable.into();
        assert_eq!(err.user_message(), "No datasets are loaded.");
    }
}
