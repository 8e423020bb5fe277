//! Ranking Engine
//!
//! Orders an aggregate table so that the best entity comes first. Whether a
//! higher or a lower value is better depends on the metric's name: metrics
//! whose name contains a negative-sense keyword (downtime, failure, ...)
//! rank ascending, everything else descending.
//!
//! Ties are broken by entity id ascending, so the output never depends on
//! input order.
//!
//! # Example
//!
//! ```rust
//! use kuba_insights::aggregation::AggregateTable;
//! use kuba_insights::ranking::{rank, top_n, Direction};
//!
//! let table = AggregateTable::from_values([("B", 2.0), ("A", 2.0), ("C", 0.5)]);
//! let result = rank(&table, "predicted downtime").unwrap();
//!
//! assert_eq!(result.direction, Direction::Ascending);
//! assert_eq!(top_n(&result, 2)[0].entity_id, "C");
//! assert_eq!(top_n(&result, 2)[1].entity_id, "A");
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregation::AggregateTable;
use crate::error::RankingError;

/// Keywords that mark a metric as "lower is better"
pub const DEFAULT_NEGATIVE_KEYWORDS: [&str; 4] = ["downtime", "failure", "probability", "error"];

// ============================================================================
// Direction
// ============================================================================

/// Sort direction of a ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Lower is better
    Ascending,
    /// Higher is better
    Descending,
}

impl Direction {
    /// Compare two values so that the better one sorts first
    fn compare(self, a: f64, b: f64) -> Ordering {
        match self {
            Direction::Ascending => a.total_cmp(&b),
            Direction::Descending => b.total_cmp(&a),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ascending => f.write_str("ascending, lower is better"),
            Direction::Descending => f.write_str("descending, higher is better"),
        }
    }
}

/// Maps a metric name to a direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionPolicy {
    negative_keywords: Vec<String>,
}

impl DirectionPolicy {
    /// Policy with a custom keyword set (matched case-insensitively)
    pub fn new<I, S>(negative_keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            negative_keywords: negative_keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Keywords in use
    pub fn negative_keywords(&self) -> &[String] {
        &self.negative_keywords
    }

    /// Ascending when the metric name contains a negative keyword
    pub fn direction_for(&self, metric: &str) -> Direction {
        let metric = metric.to_lowercase();
        if self.negative_keywords.iter().any(|k| metric.contains(k.as_str())) {
            Direction::Ascending
        } else {
            Direction::Descending
        }
    }
}

impl Default for DirectionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NEGATIVE_KEYWORDS)
    }
}

// ============================================================================
// Result
// ============================================================================

/// One entity in a ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    /// Entity identifier
    pub entity_id: String,
    /// Aggregated value
    pub value: f64,
}

/// Entities ordered best first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingResult {
    /// Metric the ranking is based on
    pub metric: String,
    /// Direction applied
    pub direction: Direction,
    /// Every entity of the source table, best first
    pub ordered: Vec<RankedEntity>,
}

impl RankingResult {
    /// Number of ranked entities
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// True when nothing was ranked
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// First `n` entities (the best), clamped to what exists
    pub fn top_n(&self, n: usize) -> &[RankedEntity] {
        &self.ordered[..n.min(self.ordered.len())]
    }

    /// Last `n` entities (the worst), clamped to what exists
    pub fn bottom_n(&self, n: usize) -> &[RankedEntity] {
        let len = self.ordered.len();
        &self.ordered[len - n.min(len)..]
    }

    /// Best performer
    pub fn best(&self) -> Option<&RankedEntity> {
        self.ordered.first()
    }

    /// Worst performer
    pub fn worst(&self) -> Option<&RankedEntity> {
        self.ordered.last()
    }

    /// `Top n: A (1.0), B (2.5). Bottom n: ...` with values rounded to 4 places
    pub fn report(&self, n: usize) -> String {
        let list = |entities: &[RankedEntity]| {
            entities
                .iter()
                .map(|e| format!("{} ({})", e.entity_id, format_value(e.value)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let top = self.top_n(n);
        let bottom = self.bottom_n(n);
        format!(
            "Top {}: {}. Bottom {}: {}.",
            top.len(),
            list(top),
            bottom.len(),
            list(bottom)
        )
    }

    /// One-line description, e.g. `Sorted inverters by average 'x' (ascending, lower is better).`
    pub fn summary(&self, entity_label: &str) -> String {
        format!(
            "Sorted {}s by average '{}' ({}).",
            entity_label, self.metric, self.direction
        )
    }
}

/// Round to 4 decimals, always showing at least one
fn format_value(value: f64) -> String {
    let scaled = value * 10_000.0;
    let mut rounded = if scaled.is_finite() {
        scaled.round() / 10_000.0
    } else {
        value
    };
    if rounded == 0.0 {
        // drops the sign of -0.0
        rounded = 0.0;
    }
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Sorts aggregate tables under a direction policy
#[derive(Debug, Clone, Default)]
pub struct RankingEngine {
    policy: DirectionPolicy,
}

impl RankingEngine {
    /// Engine with the given policy
    pub fn new(policy: DirectionPolicy) -> Self {
        Self { policy }
    }

    /// Policy in use
    pub fn policy(&self) -> &DirectionPolicy {
        &self.policy
    }

    /// Rank every entity of `table` by `metric`'s direction
    pub fn rank(
        &self,
        table: &AggregateTable,
        metric: &str,
    ) -> Result<RankingResult, RankingError> {
        if table.is_empty() {
            return Err(RankingError::EmptyInput);
        }

        let direction = self.policy.direction_for(metric);
        let mut ordered: Vec<RankedEntity> = table
            .iter()
            .map(|row| RankedEntity {
                entity_id: row.entity_id.clone(),
                value: row.value,
            })
            .collect();
        ordered.sort_by(|a, b| {
            direction
                .compare(a.value, b.value)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });

        debug!(
            metric = %metric,
            direction = ?direction,
            entities = ordered.len(),
            "Ranked entities"
        );

        Ok(RankingResult {
            metric: metric.to_string(),
            direction,
            ordered,
        })
    }
}

/// Rank with the default policy
pub fn rank(table: &AggregateTable, metric: &str) -> Result<RankingResult, RankingError> {
    RankingEngine::default().rank(table, metric)
}

/// Best `n` entities of a ranking
pub fn top_n(result: &RankingResult, n: usize) -> &[RankedEntity] {
    result.top_n(n)
}

/// Worst `n` entities of a ranking
pub fn bottom_n(result: &RankingResult, n: usize) -> &[RankedEntity] {
    result.bottom_n(n)
}
