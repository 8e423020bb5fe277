//! Query Interpreter
//!
//! Maps free text to a `(dataset, metric)` [`Selection`]. Matching is plain
//! lower-case substring search, applied in this fixed order:
//!
//! 1. Datasets are scanned in catalog registration order; the first one with a
//!    keyword contained in the query is selected.
//! 2. Within that dataset, metric aliases are scanned in metric priority order;
//!    the first alias contained in the query wins.
//! 3. Otherwise a fallback rule pointing into that dataset whose keyword is in
//!    the query wins, and failing that the dataset's primary metric.
//! 4. If no dataset keyword matched, the fallback rules are tried in order
//!    against the whole catalog.
//! 5. If still unresolved, the configured default pair is used, or the first
//!    dataset that has a metric when the default is not loaded.
//!
//! Interpretation therefore never fails on ambiguous text; it fails only when
//! the catalog has nothing to select.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::catalog::{normalize_column_name, Catalog, DatasetMetadata};
use crate::error::InterpreterError;
use crate::types::{FilterSpec, Selection};

/// A keyword that maps straight to a `(dataset, metric)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRule {
    /// Lower-case keyword searched for in the query
    #[serde(deserialize_with = "deserialize_keyword")]
    pub keyword: String,
    /// Target dataset
    pub dataset: String,
    /// Target metric
    pub metric: String,
}

impl FallbackRule {
    /// Create a rule
    pub fn new(
        keyword: impl Into<String>,
        dataset: impl Into<String>,
        metric: impl Into<String>,
    ) -> Self {
        let keyword: String = keyword.into();
        Self {
            keyword: normalize_keyword(&keyword),
            dataset: dataset.into(),
            metric: metric.into(),
        }
    }
}

fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

fn deserialize_keyword<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|k| normalize_keyword(&k))
}

/// The generic keyword table used when no dataset keyword matches
pub fn default_fallback_rules() -> Vec<FallbackRule> {
    vec![
        FallbackRule::new("feature", "features", "importance"),
        FallbackRule::new("probability", "performance", "predicted failure probabilities"),
        FallbackRule::new("downtime", "performance", "predicted downtime"),
    ]
}

/// Which rule produced a selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchRule {
    /// Dataset keyword, then a metric alias in the query
    MetricName {
        /// Dataset keyword that matched
        keyword: String,
        /// Metric alias that matched
        alias: String,
    },
    /// Dataset keyword, then a fallback rule into that dataset
    DatasetFallback {
        /// Dataset keyword that matched
        keyword: String,
        /// Fallback keyword that matched
        fallback: String,
    },
    /// Dataset keyword only; the dataset's primary metric was used
    DatasetPrimary {
        /// Dataset keyword that matched
        keyword: String,
    },
    /// No dataset keyword; a fallback rule matched
    Fallback {
        /// Fallback keyword that matched
        keyword: String,
    },
    /// Nothing matched
    Default,
}

/// Selection plus the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// The resolved pair
    pub selection: Selection,
    /// How it was resolved
    pub rule: MatchRule,
}

impl Resolution {
    /// One-sentence account of the resolution
    pub fn summary(&self) -> String {
        let how = match &self.rule {
            MatchRule::MetricName { alias, .. } => format!("matched metric '{}'", alias),
            MatchRule::DatasetFallback { keyword, fallback } => {
                format!("matched keywords '{}' and '{}'", keyword, fallback)
            },
            MatchRule::DatasetPrimary { keyword } => {
                format!("matched keyword '{}', using the primary metric", keyword)
            },
            MatchRule::Fallback { keyword } => format!("matched keyword '{}'", keyword),
            MatchRule::Default => "no keyword matched, using the default".to_string(),
        };
        format!(
            "Selected '{}' from dataset '{}' ({}).",
            self.selection.metric(),
            self.selection.dataset(),
            how
        )
    }
}

/// Resolves query text against a catalog
#[derive(Debug, Clone)]
pub struct QueryInterpreter {
    fallback: Vec<FallbackRule>,
    default_dataset: String,
    default_metric: String,
}

impl Default for QueryInterpreter {
    fn default() -> Self {
        Self::new("performance", "predicted failure probabilities")
            .with_fallback(default_fallback_rules())
    }
}

impl QueryInterpreter {
    /// Create an interpreter with a default pair and no fallback rules
    pub fn new(default_dataset: impl Into<String>, default_metric: impl Into<String>) -> Self {
        Self {
            fallback: Vec::new(),
            default_dataset: default_dataset.into(),
            default_metric: default_metric.into(),
        }
    }

    /// Replace the fallback rules
    pub fn with_fallback(mut self, mut rules: Vec<FallbackRule>) -> Self {
        for rule in &mut rules {
            rule.keyword = normalize_keyword(&rule.keyword);
        }
        self.fallback = rules;
        self
    }

    /// Fallback rules in evaluation order
    pub fn fallback_rules(&self) -> &[FallbackRule] {
        &self.fallback
    }

    /// Resolve query text to a selection
    pub fn resolve(
        &self,
        catalog: &Catalog,
        query: &str,
        filters: Option<&FilterSpec>,
    ) -> Result<Selection, InterpreterError> {
        self.interpret(catalog, query, filters).map(|r| r.selection)
    }

    /// Resolve query text, reporting which rule matched
    pub fn interpret(
        &self,
        catalog: &Catalog,
        query: &str,
        filters: Option<&FilterSpec>,
    ) -> Result<Resolution, InterpreterError> {
        if catalog.is_empty() {
            return Err(InterpreterError::NoDatasetsAvailable);
        }

        let text = normalize_column_name(query);
        let resolution = self
            .match_dataset_keyword(catalog, &text)
            .or_else(|| self.match_fallback(catalog, &text, None))
            .map(|(selection, rule)| Resolution { selection, rule })
            .or_else(|| self.default_resolution(catalog))
            .ok_or(InterpreterError::NoDatasetsAvailable)?;

        debug!(
            query = %text,
            selection = %resolution.selection,
            rule = ?resolution.rule,
            "Query resolved"
        );

        if let (Some(filters), Ok(meta)) =
            (filters, catalog.describe(resolution.selection.dataset()))
        {
            warn_on_unusable_filters(meta, filters);
        }

        Ok(resolution)
    }

    fn match_dataset_keyword(
        &self,
        catalog: &Catalog,
        text: &str,
    ) -> Option<(Selection, MatchRule)> {
        for meta in catalog.datasets() {
            let Some(keyword) = meta.keywords.iter().find(|k| text.contains(k.as_str())) else {
                continue;
            };
            let Some(primary) = meta.primary_metric() else {
                debug!(
                    dataset = %meta.name,
                    keyword = %keyword,
                    "Keyword matched a dataset without metrics"
                );
                continue;
            };

            if let Some(entry) = catalog
                .metric_aliases(&meta.name)
                .iter()
                .find(|a| text.contains(a.alias.as_str()))
            {
                return Some((
                    Selection::new_unchecked(entry.dataset.clone(), entry.metric.clone()),
                    MatchRule::MetricName {
                        keyword: keyword.clone(),
                        alias: entry.alias.clone(),
                    },
                ));
            }

            if let Some((selection, MatchRule::Fallback { keyword: fallback })) =
                self.match_fallback(catalog, text, Some(&meta.name))
            {
                return Some((
                    selection,
                    MatchRule::DatasetFallback {
                        keyword: keyword.clone(),
                        fallback,
                    },
                ));
            }

            return Some((
                Selection::new_unchecked(meta.name.clone(), primary),
                MatchRule::DatasetPrimary {
                    keyword: keyword.clone(),
                },
            ));
        }
        None
    }

    /// First fallback rule whose keyword is in the text and whose target is loaded
    fn match_fallback(
        &self,
        catalog: &Catalog,
        text: &str,
        within: Option<&str>,
    ) -> Option<(Selection, MatchRule)> {
        self.fallback
            .iter()
            .filter(|rule| !rule.keyword.is_empty() && text.contains(rule.keyword.as_str()))
            .filter(|rule| within.map_or(true, |ds| rule.dataset.eq_ignore_ascii_case(ds)))
            .find_map(|rule| {
                catalog.selection(&rule.dataset, &rule.metric).ok().map(|selection| {
                    (
                        selection,
                        MatchRule::Fallback {
                            keyword: rule.keyword.clone(),
                        },
                    )
                })
            })
    }

    fn default_resolution(&self, catalog: &Catalog) -> Option<Resolution> {
        if let Ok(selection) = catalog.selection(&self.default_dataset, &self.default_metric) {
            return Some(Resolution {
                selection,
                rule: MatchRule::Default,
            });
        }

        warn!(
            dataset = %self.default_dataset,
            metric = %self.default_metric,
            "Default selection not loaded, using first dataset with a metric"
        );
        catalog.datasets().find_map(|meta| {
            meta.primary_metric().map(|metric| Resolution {
                selection: Selection::new_unchecked(meta.name.clone(), metric),
                rule: MatchRule::Default,
            })
        })
    }
}

fn warn_on_unusable_filters(meta: &DatasetMetadata, filters: &FilterSpec) {
    if filters.entity_id.is_some() && meta.entity_column.is_none() {
        warn!(dataset = %meta.name, "Entity filter given but dataset has no entity column");
    }
    let wants_time = filters.granularity.is_some()
        || filters.start_date.is_some()
        || filters.end_date.is_some();
    if wants_time && meta.timestamp_column.is_none() {
        warn!(dataset = %meta.name, "Time filters given but dataset has no timestamp column");
    }
}

/// Resolve with the default interpreter
pub fn resolve(
    catalog: &Catalog,
    query: &str,
    filters: Option<&FilterSpec>,
) -> Result<Selection, InterpreterError> {
    QueryInterpreter::default().resolve(catalog, query, filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetDefinition, InMemorySource};

    fn catalog() -> Catalog {
        Catalog::builder()
            .add_source(
                DatasetDefinition::new("performance")
                    .with_keywords(["downtime", "failure", "probability", "performance"])
                    .with_key_columns(["timestamp", "inverter_id"])
                    .with_metrics([
                        "target downtime",
                        "predicted downtime",
                        "predicted failure probabilities",
                    ]),
                InMemorySource::new(
                    [
                        "timestamp",
                        "inverter_id",
                        "target downtime",
                        "predicted downtime",
                        "predicted failure probabilities",
                    ],
                    vec![vec!["2024-01-01 00:00:00", "A", "1", "1.5", "0.2"]],
                ),
            )
            .add_source(
                DatasetDefinition::new("features")
                    .with_keywords(["feature", "importance", "factor", "variable", "contributor"])
                    .with_key_columns(["feature_name"])
                    .with_metrics(["importance"]),
                InMemorySource::new(["feature_name", "importance"], vec![vec!["temp", "0.4"]]),
            )
            .build()
            .unwrap()
    }

    fn pair(selection: &Selection) -> (&str, &str) {
        (selection.dataset(), selection.metric())
    }

    #[test]
    fn test_keyword_and_metric_name() {
        let interpreter = QueryInterpreter::default();
        let resolution = interpreter
            .interpret(&catalog(), "Which inverter has the highest Predicted Downtime?", None)
            .unwrap();

        assert_eq!(pair(&resolution.selection), ("performance", "predicted downtime"));
        assert!(matches!(resolution.rule, MatchRule::MetricName { .. }));
    }

    #[test]
    fn test_keyword_then_dataset_fallback() {
        let selection = resolve(
            &catalog(),
            "what is the worst inverter for failure probability",
            None,
        )
        .unwrap();
        assert_eq!(pair(&selection), ("performance", "predicted failure probabilities"));
    }

    #[test]
    fn test_keyword_then_primary_metric() {
        let interpreter = QueryInterpreter::new("performance", "predicted downtime");
        let resolution = interpreter
            .interpret(&catalog(), "show me performance", None)
            .unwrap();

        assert_eq!(pair(&resolution.selection), ("performance", "target downtime"));
        assert_eq!(
            resolution.rule,
            MatchRule::DatasetPrimary {
                keyword: "performance".to_string()
            }
        );
    }

    #[test]
    fn test_first_registered_dataset_wins() {
        // "importance" is a features keyword, "failure" a performance keyword
        let selection = resolve(&catalog(), "importance of failure", None).unwrap();
        assert_eq!(selection.dataset(), "performance");
    }

    #[test]
    fn test_generic_fallback_without_dataset_keyword() {
        let interpreter = QueryInterpreter::new("performance", "target downtime")
            .with_fallback(vec![FallbackRule::new("ranking", "features", "importance")]);
        let resolution = interpreter
            .interpret(&catalog(), "give me the ranking", None)
            .unwrap();

        assert_eq!(pair(&resolution.selection), ("features", "importance"));
        assert_eq!(
            resolution.rule,
            MatchRule::Fallback {
                keyword: "ranking".to_string()
            }
        );
    }

    #[test]
    fn test_fallback_to_unloaded_target_is_skipped() {
        let interpreter =
            QueryInterpreter::new("performance", "target downtime").with_fallback(vec![
                FallbackRule::new("weather", "weather", "temperature"),
                FallbackRule::new("weather", "features", "importance"),
            ]);
        let selection = interpreter.resolve(&catalog(), "weather report", None).unwrap();
        assert_eq!(pair(&selection), ("features", "importance"));
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let resolution = QueryInterpreter::default()
            .interpret(&catalog(), "hello there", None)
            .unwrap();

        assert_eq!(
            pair(&resolution.selection),
            ("performance", "predicted failure probabilities")
        );
        assert_eq!(resolution.rule, MatchRule::Default);
        assert!(resolution.summary().contains("using the default"));
    }

    #[test]
    fn test_unloaded_default_uses_first_dataset() {
        let interpreter = QueryInterpreter::new("weather", "temperature");
        let selection = interpreter.resolve(&catalog(), "hello", None).unwrap();
        assert_eq!(pair(&selection), ("performance", "target downtime"));
    }

    #[test]
    fn test_empty_catalog() {
        let err = resolve(&Catalog::default(), "anything", None).unwrap_err();
        assert!(matches!(err, InterpreterError::NoDatasetsAvailable));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = catalog();
        let interpreter = QueryInterpreter::default();
        let query = "downtime and feature factors";
        let first = interpreter.interpret(&catalog, query, None).unwrap();
        for _ in 0..10 {
            let again = interpreter.interpret(&catalog, query, None).unwrap();
            assert_eq!(first, again);
        }
    }
}
