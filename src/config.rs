//! Configuration management for Kuba Insights
//!
//! TOML file support with environment variable overrides and defaults that
//! reproduce the stock two-dataset deployment (inverter performance and
//! feature importance).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogBuilder, CsvSource, DatasetDefinition};
use crate::error::{Error, Result};
use crate::interpreter::{default_fallback_rules, FallbackRule, QueryInterpreter};
use crate::ranking::{DirectionPolicy, DEFAULT_NEGATIVE_KEYWORDS};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Datasets to load
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Query interpretation
    #[serde(default)]
    pub interpreter: InterpreterConfig,

    /// Ranking policy and presentation
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Catalog configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Directory that relative dataset paths are resolved against
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Datasets in registration order; order decides keyword precedence
    #[serde(default = "default_datasets")]
    pub datasets: Vec<DatasetConfig>,
}

/// One CSV-backed dataset
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatasetConfig {
    /// Registered name
    pub name: String,

    /// CSV file, relative to `data_dir` unless absolute
    pub path: PathBuf,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Query keywords
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Key columns (timestamp, entity id)
    #[serde(default)]
    pub key_columns: Vec<String>,

    /// Metrics listed ahead of auto-discovered ones
    #[serde(default)]
    pub metrics: Vec<String>,

    /// Entity column override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_column: Option<String>,

    /// Timestamp column override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_column: Option<String>,

    /// Singular entity noun override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_label: Option<String>,
}

/// Interpreter configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InterpreterConfig {
    /// Dataset used when nothing in the query matches
    #[serde(default = "default_dataset")]
    pub default_dataset: String,

    /// Metric used when nothing in the query matches
    #[serde(default = "default_metric")]
    pub default_metric: String,

    /// Generic keyword table, evaluated in order
    #[serde(default = "default_fallback_rules")]
    pub fallback: Vec<FallbackRule>,
}

/// Ranking configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RankingConfig {
    /// Metric-name keywords that make lower values better
    #[serde(default = "default_negative_keywords")]
    pub negative_keywords: Vec<String>,

    /// Entities shown in the top/bottom report
    #[serde(default = "default_summary_size")]
    pub summary_size: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level or `EnvFilter` directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_dataset() -> String { "performance".to_string() }
fn default_metric() -> String { "predicted failure probabilities".to_string() }
fn default_negative_keywords() -> Vec<String> {
    DEFAULT_NEGATIVE_KEYWORDS.iter().map(|k| k.to_string()).collect()
}
fn default_summary_size() -> usize { 3 }
fn default_log_level() -> String { "info".to_string() }

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_datasets() -> Vec<DatasetConfig> {
    vec![
        DatasetConfig {
            name: "performance".to_string(),
            path: PathBuf::from("inverter_performance_prediction.csv"),
            description: "Predicted and actual inverter downtimes and failure probabilities."
                .to_string(),
            keywords: strings(&["downtime", "failure", "probability", "performance"]),
            key_columns: strings(&["timestamp", "inverter_id"]),
            metrics: strings(&[
                "target downtime",
                "predicted downtime",
                "predicted failure probabilities",
            ]),
            entity_column: None,
            timestamp_column: None,
            entity_label: None,
        },
        DatasetConfig {
            name: "features".to_string(),
            path: PathBuf::from("feature_importance.csv"),
            description: "Feature importance scores for predicting inverter performance."
                .to_string(),
            keywords: strings(&["feature", "importance", "factor", "variable", "contributor"]),
            key_columns: strings(&["feature_name"]),
            metrics: strings(&["importance"]),
            entity_column: None,
            timestamp_column: None,
            entity_label: None,
        },
    ]
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            datasets: default_datasets(),
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            default_dataset: default_dataset(),
            default_metric: default_metric(),
            fallback: default_fallback_rules(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            negative_keywords: default_negative_keywords(),
            summary_size: default_summary_size(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DatasetConfig {
    /// Declared metadata for the catalog
    pub fn definition(&self) -> DatasetDefinition {
        let mut definition = DatasetDefinition::new(&self.name)
            .with_description(&self.description)
            .with_keywords(&self.keywords)
            .with_key_columns(&self.key_columns)
            .with_metrics(&self.metrics);
        if let Some(column) = &self.entity_column {
            definition = definition.with_entity_column(column);
        }
        if let Some(column) = &self.timestamp_column {
            definition = definition.with_timestamp_column(column);
        }
        if let Some(label) = &self.entity_label {
            definition = definition.with_entity_label(label);
        }
        definition
    }

    /// File location with `data_dir` applied
    pub fn resolved_path(&self, data_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            data_dir.join(&self.path)
        }
    }
}

impl InterpreterConfig {
    /// Interpreter with this default pair and fallback table
    pub fn build(&self) -> QueryInterpreter {
        QueryInterpreter::new(&self.default_dataset, &self.default_metric)
            .with_fallback(self.fallback.clone())
    }
}

impl RankingConfig {
    /// Direction policy over the configured keywords
    pub fn policy(&self) -> DirectionPolicy {
        DirectionPolicy::new(&self.negative_keywords)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Catalog
        if let Some(data_dir) = var("INSIGHTS_DATA_DIR") {
            self.catalog.data_dir = PathBuf::from(data_dir);
        }

        // Interpreter
        if let Some(dataset) = var("INSIGHTS_DEFAULT_DATASET") {
            self.interpreter.default_dataset = dataset;
        }
        if let Some(metric) = var("INSIGHTS_DEFAULT_METRIC") {
            self.interpreter.default_metric = metric;
        }

        // Monitoring
        if let Some(log_level) = var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::Configuration(msg));

        if self.catalog.data_dir.as_os_str().is_empty() {
            return invalid("Data directory cannot be empty".to_string());
        }

        let mut seen = Vec::with_capacity(self.catalog.datasets.len());
        for dataset in &self.catalog.datasets {
            let name = dataset.name.trim().to_lowercase();
            if name.is_empty() {
                return invalid("Dataset name cannot be empty".to_string());
            }
            if dataset.path.as_os_str().is_empty() {
                return invalid(format!("Dataset '{}' has no path", name));
            }
            if seen.contains(&name) {
                return invalid(format!("Dataset '{}' is defined more than once", name));
            }
            seen.push(name);
        }

        if self.interpreter.default_dataset.trim().is_empty()
            || self.interpreter.default_metric.trim().is_empty()
        {
            return invalid("Default dataset and metric must be set".to_string());
        }
        if let Some(rule) = self.interpreter.fallback.iter().find(|r| r.keyword.trim().is_empty()) {
            return invalid(format!(
                "Fallback rule for '{}'.'{}' has an empty keyword",
                rule.dataset, rule.metric
            ));
        }

        if self.ranking.summary_size == 0 {
            return invalid("Ranking summary size must be > 0".to_string());
        }

        if self.monitoring.log_level.trim().is_empty() {
            return invalid("Log level cannot be empty".to_string());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }

    /// Build the catalog from the configured CSV files
    ///
    /// Files that do not exist are skipped with a warning; a file that exists
    /// but cannot be parsed is an error.
    pub fn load_catalog(&self) -> Result<Catalog> {
        let mut builder = CatalogBuilder::new();
        for dataset in &self.catalog.datasets {
            let path = dataset.resolved_path(&self.catalog.data_dir);
            if !path.exists() {
                warn!(
                    dataset = %dataset.name,
                    path = %path.display(),
                    "Dataset file not found, skipping"
                );
                continue;
            }
            builder = builder.add_source(dataset.definition(), CsvSource::from_path(path));
        }

        let catalog = builder.build()?;
        info!(
            datasets = catalog.len(),
            data_dir = %self.catalog.data_dir.display(),
            "Catalog loaded"
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.catalog.datasets.len(), 2);
        assert_eq!(config.catalog.datasets[0].name, "performance");
        assert_eq!(config.interpreter.fallback.len(), 3);
        assert_eq!(config.ranking.summary_size, 3);
        assert_eq!(config.monitoring.log_level, "info");
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_summary_size() {
        let mut config = Config::default();
        config.ranking.summary_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_dataset_invalid() {
        let mut config = Config::default();
        let mut copy = config.catalog.datasets[0].clone();
        copy.name = " Performance ".to_string();
        config.catalog.datasets.push(copy);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_env_override() {
        let vars: HashMap<&str, &str> = [
            ("INSIGHTS_DATA_DIR", "/srv/insights"),
            ("INSIGHTS_DEFAULT_METRIC", "predicted downtime"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.catalog.data_dir, PathBuf::from("/srv/insights"));
        assert_eq!(config.interpreter.default_metric, "predicted downtime");
        assert_eq!(config.interpreter.default_dataset, "performance");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ranking]
            summary_size = 5

            [[catalog.datasets]]
            name = "weather"
            path = "weather.csv"
            key_columns = ["timestamp", "station"]
            "#,
        )
        .unwrap();

        assert_eq!(config.ranking.summary_size, 5);
        assert_eq!(config.ranking.negative_keywords.len(), 4);
        assert_eq!(config.catalog.datasets.len(), 1);
        assert_eq!(config.catalog.data_dir, PathBuf::from("data"));
        assert_eq!(config.interpreter.default_dataset, "performance");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insights.toml");

        let mut config = Config::default();
        config.catalog.datasets[1].entity_label = Some("feature".to_string());
        config.save_to_file(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("feature_importance.csv"),
            "feature_name,importance\ntemp,0.4\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.catalog.data_dir = dir.path().to_path_buf();
        let catalog = config.load_catalog().unwrap();

        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["features"]);
    }

    #[test]
    fn test_dataset_definition_carries_overrides() {
        let mut dataset = default_datasets().remove(0);
        dataset.entity_column = Some("inverter_id".to_string());
        let definition = dataset.definition();

        assert_eq!(definition.name, "performance");
        assert_eq!(definition.entity_column.as_deref(), Some("inverter_id"));
        assert_eq!(
            dataset.resolved_path(Path::new("/d")),
            PathBuf::from("/d/inverter_performance_prediction.csv")
        );
    }

    #[test]
    fn test_fallback_keywords_from_toml_are_normalized() {
        use crate::catalog::{Catalog, DatasetDefinition, InMemorySource};

        let config: Config = toml::from_str(
            r#"
            [[interpreter.fallback]]
            keyword = "  Ranking "
            dataset = "features"
            metric = "importance"
            "#,
        )
        .unwrap();
        assert_eq!(config.interpreter.fallback[0].keyword, "ranking");

        let catalog = Catalog::builder()
            .add_source(
                DatasetDefinition::new("performance")
                    .with_keywords(["inverter"])
                    .with_key_columns(["inverter_id"]),
                InMemorySource::new(
                    ["inverter_id", "predicted failure probabilities"],
                    vec![vec!["A", "0.1"]],
                ),
            )
            .add_source(
                DatasetDefinition::new("features")
                    .with_keywords(["feature"])
                    .with_key_columns(["feature_name"]),
                InMemorySource::new(["feature_name", "importance"], vec![vec!["temp", "0.4"]]),
            )
            .build()
            .unwrap();

        let selection = config
            .interpreter
            .build()
            .resolve(&catalog, "give me the ranking", None)
            .unwrap();
        assert_eq!(selection.dataset(), "features");
        assert_eq!(selection.metric(), "importance");
    }
}
