//! Pipeline Orchestrator
//!
//! Threads one [`PipelineContext`] per query through the three stages:
//!
//! ```text
//! query text ──▶ interpret ──▶ aggregate ──▶ rank ──▶ Answer
//!                   │              │           │
//!                   └──────── StageFailure ────┘
//! ```
//!
//! A context is created for every call and owned by that call alone. The
//! [`Catalog`] is the only thing shared between concurrent queries, and it is
//! read-only. [`Pipeline`] keeps counters, never query state.
//!
//! # Example
//!
//! ```rust
//! use kuba_insights::catalog::{Catalog, DatasetDefinition, InMemorySource};
//! use kuba_insights::pipeline::answer;
//!
//! let catalog = Catalog::builder()
//!     .add_source(
//!         DatasetDefinition::new("performance")
//!             .with_keywords(["downtime"])
//!             .with_key_columns(["timestamp", "inverter_id"]),
//!         InMemorySource::new(
//!             ["timestamp", "inverter_id", "predicted_downtime"],
//!             vec![
//!                 vec!["2024-01-01 00:00:00", "A", "3.0"],
//!                 vec!["2024-01-01 00:00:00", "B", "1.0"],
//!             ],
//!         ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let answer = answer(&catalog, "which inverter has the least downtime?", None).unwrap();
//! assert_eq!(answer.ranking.best().unwrap().entity_id, "B");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregation::{AggregateRow, AggregateTable, Aggregation, AggregationEngine, RowCounts};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::Error;
use crate::interpreter::{MatchRule, QueryInterpreter, Resolution};
use crate::ranking::{RankingEngine, RankingResult};
use crate::types::{FilterSpec, Selection};

/// Entities listed in the top/bottom report unless configured otherwise
pub const DEFAULT_SUMMARY_SIZE: usize = 3;

// ============================================================================
// Stages
// ============================================================================

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Query text to selection
    Interpretation,
    /// Selection to per-entity table
    Aggregation,
    /// Table to ordered ranking
    Ranking,
}

impl Stage {
    /// Lower-case stage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Interpretation => "interpretation",
            Stage::Aggregation => "aggregation",
            Stage::Ranking => "ranking",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural-language outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// Stage that produced it
    pub stage: Stage,
    /// Sentence describing the outcome
    pub message: String,
}

/// The stage that stopped a query, and why
#[derive(Debug)]
pub struct StageFailure {
    /// Failing stage
    pub stage: Stage,
    /// Short user-facing sentence
    pub message: String,
    /// Underlying typed error
    pub error: Error,
}

impl StageFailure {
    fn new(stage: Stage, error: impl Into<Error>) -> Self {
        let error = error.into();
        Self {
            stage,
            message: error.user_message(),
            error,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Request-scoped state threaded between the stages
///
/// Each stage reads what the previous one wrote and fills exactly one field.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    query: String,
    filters: FilterSpec,
    resolution: Option<Resolution>,
    aggregation: Option<Aggregation>,
    ranking: Option<RankingResult>,
    summaries: Vec<StageSummary>,
}

impl PipelineContext {
    /// Fresh context for one query
    pub fn new(query: impl Into<String>, filters: FilterSpec) -> Self {
        Self {
            query: query.into(),
            filters,
            resolution: None,
            aggregation: None,
            ranking: None,
            summaries: Vec::new(),
        }
    }

    /// Query text
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Filters supplied with the query
    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    /// Resolved selection, once interpretation ran
    pub fn selection(&self) -> Option<&Selection> {
        self.resolution.as_ref().map(|r| &r.selection)
    }

    /// Interpretation output
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Aggregation output
    pub fn aggregation(&self) -> Option<&Aggregation> {
        self.aggregation.as_ref()
    }

    /// Ranking output
    pub fn ranking(&self) -> Option<&RankingResult> {
        self.ranking.as_ref()
    }

    /// Stage summaries so far
    pub fn summaries(&self) -> &[StageSummary] {
        &self.summaries
    }

    fn missing(stage: Stage, input: &'static str) -> StageFailure {
        StageFailure::new(stage, Error::MissingStageInput(input))
    }

    fn record(&mut self, stage: Stage, message: String) {
        self.summaries.push(StageSummary { stage, message });
    }

    /// Resolve the query text to a selection
    pub fn interpret(
        &mut self,
        catalog: &Catalog,
        interpreter: &QueryInterpreter,
    ) -> Result<(), StageFailure> {
        let resolution = interpreter
            .interpret(catalog, &self.query, Some(&self.filters))
            .map_err(|e| StageFailure::new(Stage::Interpretation, e))?;
        self.record(Stage::Interpretation, resolution.summary());
        self.resolution = Some(resolution);
        Ok(())
    }

    /// Aggregate the selected metric per entity
    pub fn aggregate(
        &mut self,
        catalog: &Catalog,
        engine: &AggregationEngine,
    ) -> Result<(), StageFailure> {
        let selection = self
            .selection()
            .ok_or_else(|| Self::missing(Stage::Aggregation, "aggregation"))?;
        let aggregation = engine
            .aggregate(catalog, selection, &self.filters)
            .map_err(|e| StageFailure::new(Stage::Aggregation, e))?;
        self.record(Stage::Aggregation, aggregation.summary());
        self.aggregation = Some(aggregation);
        Ok(())
    }

    /// Rank the aggregated entities
    pub fn rank(&mut self, engine: &RankingEngine) -> Result<(), StageFailure> {
        let aggregation = self
            .aggregation
            .as_ref()
            .ok_or_else(|| Self::missing(Stage::Ranking, "ranking"))?;
        let ranking = engine
            .rank(&aggregation.table, aggregation.selection.metric())
            .map_err(|e| StageFailure::new(Stage::Ranking, e))?;
        let summary = ranking.summary(&aggregation.entity_label);
        self.record(Stage::Ranking, summary);
        self.ranking = Some(ranking);
        Ok(())
    }

    /// Run all three stages in order, stopping at the first failure
    pub fn run(
        &mut self,
        catalog: &Catalog,
        interpreter: &QueryInterpreter,
        aggregation: &AggregationEngine,
        ranking: &RankingEngine,
    ) -> Result<(), StageFailure> {
        self.interpret(catalog, interpreter)?;
        self.aggregate(catalog, aggregation)?;
        self.rank(ranking)
    }

    /// Consume a fully run context
    pub fn into_answer(self, summary_size: usize) -> Result<Answer, StageFailure> {
        let resolution = self
            .resolution
            .ok_or_else(|| Self::missing(Stage::Interpretation, "interpretation"))?;
        let aggregation = self
            .aggregation
            .ok_or_else(|| Self::missing(Stage::Aggregation, "aggregation"))?;
        let ranking = self
            .ranking
            .ok_or_else(|| Self::missing(Stage::Ranking, "ranking"))?;

        Ok(Answer {
            report: ranking.report(summary_size),
            query: self.query,
            filters: self.filters,
            selection: resolution.selection,
            rule: resolution.rule,
            aggregate_table: aggregation.table,
            buckets: aggregation.buckets,
            row_counts: aggregation.counts,
            ranking,
            summaries: self.summaries,
        })
    }
}

// ============================================================================
// Answer
// ============================================================================

/// Structured result of one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Query text as received
    pub query: String,
    /// Filters as received
    pub filters: FilterSpec,
    /// Resolved `(dataset, metric)`
    pub selection: Selection,
    /// Rule that produced the selection
    pub rule: MatchRule,
    /// One value per entity
    pub aggregate_table: AggregateTable,
    /// Per-bucket means, when a granularity was applied
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<AggregateRow>,
    /// Row accounting of the aggregation
    pub row_counts: RowCounts,
    /// Entities best first
    pub ranking: RankingResult,
    /// Top/bottom report
    pub report: String,
    /// One sentence per stage
    pub summaries: Vec<StageSummary>,
}

impl Answer {
    /// Summaries followed by the report, one per line
    pub fn text(&self) -> String {
        let mut lines: Vec<&str> = self.summaries.iter().map(|s| s.message.as_str()).collect();
        lines.push(&self.report);
        lines.join("\n")
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for a pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Queries received
    pub queries: AtomicU64,
    /// Queries answered
    pub answered: AtomicU64,
    /// Failures in interpretation
    pub interpretation_failures: AtomicU64,
    /// Failures in aggregation
    pub aggregation_failures: AtomicU64,
    /// Failures in ranking
    pub ranking_failures: AtomicU64,
}

impl PipelineStats {
    fn record_failure(&self, stage: Stage) {
        let counter = match stage {
            Stage::Interpretation => &self.interpretation_failures,
            Stage::Aggregation => &self.aggregation_failures,
            Stage::Ranking => &self.ranking_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            interpretation_failures: self.interpretation_failures.load(Ordering::Relaxed),
            aggregation_failures: self.aggregation_failures.load(Ordering::Relaxed),
            ranking_failures: self.ranking_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pipeline statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Queries received
    pub queries: u64,
    /// Queries answered
    pub answered: u64,
    /// Failures in interpretation
    pub interpretation_failures: u64,
    /// Failures in aggregation
    pub aggregation_failures: u64,
    /// Failures in ranking
    pub ranking_failures: u64,
}

impl PipelineStatsSnapshot {
    /// Failures across all stages
    pub fn failures(&self) -> u64 {
        self.interpretation_failures + self.aggregation_failures + self.ranking_failures
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Shared entry point: a catalog plus stage configuration
///
/// `Pipeline` is `Sync`; one instance can serve any number of threads.
#[derive(Debug)]
pub struct Pipeline {
    catalog: Arc<Catalog>,
    interpreter: QueryInterpreter,
    aggregation: AggregationEngine,
    ranking: RankingEngine,
    summary_size: usize,
    stats: PipelineStats,
}

impl Pipeline {
    /// Pipeline with default interpreter and ranking policy
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            interpreter: QueryInterpreter::default(),
            aggregation: AggregationEngine::new(),
            ranking: RankingEngine::default(),
            summary_size: DEFAULT_SUMMARY_SIZE,
            stats: PipelineStats::default(),
        }
    }

    /// Load the configured catalog and build the stages from `config`
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        config.validate()?;
        let catalog = Arc::new(config.load_catalog()?);
        Ok(Self::new(catalog)
            .with_interpreter(config.interpreter.build())
            .with_ranking_engine(RankingEngine::new(config.ranking.policy()))
            .with_summary_size(config.ranking.summary_size))
    }

    /// Replace the interpreter
    pub fn with_interpreter(mut self, interpreter: QueryInterpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Replace the ranking engine
    pub fn with_ranking_engine(mut self, ranking: RankingEngine) -> Self {
        self.ranking = ranking;
        self
    }

    /// Entities listed in the top/bottom report
    pub fn with_summary_size(mut self, size: usize) -> Self {
        self.summary_size = size.max(1);
        self
    }

    /// Shared catalog
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Answer one query
    pub fn answer(
        &self,
        query: &str,
        filters: Option<&FilterSpec>,
    ) -> Result<Answer, StageFailure> {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);

        let mut ctx = PipelineContext::new(query, filters.cloned().unwrap_or_default());
        let outcome = ctx
            .run(&self.catalog, &self.interpreter, &self.aggregation, &self.ranking)
            .and_then(|()| ctx.into_answer(self.summary_size));

        match &outcome {
            Ok(answer) => {
                self.stats.answered.fetch_add(1, Ordering::Relaxed);
                info!(
                    selection = %answer.selection,
                    entities = answer.aggregate_table.len(),
                    direction = ?answer.ranking.direction,
                    "Query answered"
                );
            },
            Err(failure) => {
                self.stats.record_failure(failure.stage);
                warn!(stage = %failure.stage, error = %failure.error, "Query failed");
            },
        }
        debug!(query = %query, "Pipeline finished");
        outcome
    }

    /// Current counters
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Answer one query against `catalog` with default stage settings
pub fn answer(
    catalog: &Catalog,
    query: &str,
    filters: Option<&FilterSpec>,
) -> Result<Answer, StageFailure> {
    let mut ctx = PipelineContext::new(query, filters.cloned().unwrap_or_default());
    ctx.run(
        catalog,
        &QueryInterpreter::default(),
        &AggregationEngine::new(),
        &RankingEngine::default(),
    )?;
    ctx.into_answer(DEFAULT_SUMMARY_SIZE)
}
