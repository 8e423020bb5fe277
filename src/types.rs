//! Core data types shared by the pipeline stages
//!
//! # Key Types
//!
//! - **`Selection`**: a resolved `(dataset, metric)` pair
//! - **`FilterSpec`**: optional date range, entity and granularity filters
//! - **`Granularity`**: time-bucket width used for resampling
//! - **`TimeBounds`**: parsed, inclusive time range derived from a `FilterSpec`
//!
//! Timestamps are UTC milliseconds since the Unix epoch throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kuba_insights::types::{FilterSpec, Granularity};
//!
//! let filters = FilterSpec::new()
//!     .with_entity("INV-001")
//!     .with_start_date("2024-01-01")
//!     .with_granularity(Granularity::Day);
//!
//! let bounds = filters.time_bounds().unwrap();
//! assert!(bounds.start.is_some());
//! assert!(bounds.end.is_none());
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AggregationError;

/// Milliseconds in one day
pub const DAY_MS: i64 = 86_400_000;

/// Epoch values below this magnitude are read as seconds, above as milliseconds
const EPOCH_SECONDS_LIMIT: i64 = 100_000_000_000;

/// Datetime layouts accepted in source data and filters, tried in order
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

// ============================================================================
// Granularity
// ============================================================================

/// Time-bucket width for resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One-minute buckets
    Minute,
    /// One-hour buckets
    Hour,
    /// Calendar-day buckets (UTC)
    Day,
    /// Weeks starting Monday 00:00 UTC
    Week,
    /// Calendar months
    Month,
}

impl Granularity {
    /// Lower-case name used in summaries and serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    /// Accepts the names plus the short frequency codes (`T`, `H`, `D`, `W`, `M`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minute" | "minutes" | "min" | "t" => Ok(Granularity::Minute),
            "hour" | "hours" | "hourly" | "h" => Ok(Granularity::Hour),
            "day" | "days" | "daily" | "d" => Ok(Granularity::Day),
            "week" | "weeks" | "weekly" | "w" => Ok(Granularity::Week),
            "month" | "months" | "monthly" | "m" => Ok(Granularity::Month),
            other => Err(format!(
                "unknown granularity '{}' (expected minute, hour, day, week or month)",
                other
            )),
        }
    }
}

// ============================================================================
// Selection
// ============================================================================

/// A resolved `(dataset, metric)` pair
///
/// Only the catalog and the interpreter construct selections, and both check
/// that the metric is one of the dataset's available metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Selection {
    dataset: String,
    metric: String,
}

impl Selection {
    /// Caller guarantees `metric` is an available metric of `dataset`
    pub(crate) fn new_unchecked(dataset: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            metric: metric.into(),
        }
    }

    /// Dataset name
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Canonical metric column name
    pub fn metric(&self) -> &str {
        &self.metric
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.'{}'", self.dataset, self.metric)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Optional filters supplied alongside a query
///
/// Dates stay as the caller wrote them; they are parsed when the aggregation
/// stage needs them so that a bad date surfaces as a typed
/// `UnparsableFilter` error from that stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    /// Inclusive upper bound; a bare date covers that whole day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    /// Restrict to one entity (case-insensitive match)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Bucket width for two-stage averaging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
}

impl FilterSpec {
    /// Create an empty filter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inclusive start date
    pub fn with_start_date(mut self, start: impl Into<String>) -> Self {
        self.start_date = Some(start.into());
        self
    }

    /// Set the inclusive end date
    pub fn with_end_date(mut self, end: impl Into<String>) -> Self {
        self.end_date = Some(end.into());
        self
    }

    /// Restrict to one entity
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the bucket width
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// True when no filter is set
    pub fn is_empty(&self) -> bool {
        self.start_date.is_none()
            && self.end_date.is_none()
            && self.entity_id.is_none()
            && self.granularity.is_none()
    }

    /// Entity filter in canonical (trimmed, lower-case) form
    pub fn normalized_entity(&self) -> Option<String> {
        self.entity_id
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    /// Parse the date filters into inclusive millisecond bounds
    pub fn time_bounds(&self) -> Result<TimeBounds, AggregationError> {
        let start = self
            .start_date
            .as_deref()
            .map(|raw| parse_filter_date("start_date", raw, false))
            .transpose()?;
        let end = self
            .end_date
            .as_deref()
            .map(|raw| parse_filter_date("end_date", raw, true))
            .transpose()?;

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AggregationError::UnparsableFilter {
                    field: "end_date",
                    value: self.end_date.clone().unwrap_or_default(),
                });
            }
        }

        Ok(TimeBounds { start, end })
    }
}

/// Inclusive time bounds in UTC milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    /// Inclusive start, unbounded when `None`
    pub start: Option<i64>,
    /// Inclusive end, unbounded when `None`
    pub end: Option<i64>,
}

impl TimeBounds {
    /// True when neither side is bounded
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Check whether a timestamp falls inside the bounds
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp <= e)
    }
}

// ============================================================================
// Timestamp parsing
// ============================================================================

/// Parse a timestamp cell into UTC milliseconds
///
/// Accepts RFC 3339, the layouts in `DATETIME_FORMATS`, bare `YYYY-MM-DD`
/// dates (midnight) and integer epoch seconds or milliseconds. Naive values
/// are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    if let Some(date) = parse_date_only(s) {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().timestamp_millis());
    }

    if let Ok(epoch) = s.parse::<i64>() {
        let millis = if epoch.unsigned_abs() < EPOCH_SECONDS_LIMIT as u64 {
            epoch.checked_mul(1000)
        } else {
            Some(epoch)
        };
        // only instants chrono can represent, so bucketing never fails later
        return millis.filter(|ms| DateTime::from_timestamp_millis(*ms).is_some());
    }

    None
}

fn parse_date_only(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parse a filter date; an end bound given as a bare date extends to the end of that day
fn parse_filter_date(
    field: &'static str,
    raw: &str,
    is_end: bool,
) -> Result<i64, AggregationError> {
    let unparsable = || AggregationError::UnparsableFilter {
        field,
        value: raw.to_string(),
    };

    let ts = parse_timestamp(raw).ok_or_else(unparsable)?;
    if is_end && parse_date_only(raw.trim()).is_some() {
        return Ok(ts + DAY_MS - 1);
    }
    Ok(ts)
}

/// Format UTC milliseconds as `YYYY-MM-DD HH:MM:SS`
pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_parse_names_and_codes() {
        assert_eq!("hour".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("H".parse::<Granularity>().unwrap(), Granularity::Hour);
        assert_eq!("T".parse::<Granularity>().unwrap(), Granularity::Minute);
        assert_eq!(" Month ".parse::<Granularity>().unwrap(), Granularity::Month);
        assert_eq!("w".parse::<Granularity>().unwrap(), Granularity::Week);
        assert!("fortnight".parse::<Granularity>().is_err());
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = 1_704_103_200_000; // 2024-01-01 10:00:00 UTC
        assert_eq!(parse_timestamp("2024-01-01 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 10:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 10:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("1704103200"), Some(expected));
        assert_eq!(parse_timestamp("1704103200000"), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("   "), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("2024-13-45"), None);
    }

    #[test]
    fn test_parse_timestamp_rejects_unrepresentable_epochs() {
        assert_eq!(parse_timestamp("-9223372036854775808"), None);
        assert_eq!(parse_timestamp("9223372036854775807"), None);
        assert_eq!(parse_timestamp("9999999999999999"), None);
        assert_eq!(parse_timestamp("-1"), Some(-1000));
    }

    #[test]
    fn test_bare_end_date_covers_whole_day() {
        let bounds = FilterSpec::new()
            .with_start_date("2024-01-01")
            .with_end_date("2024-01-01")
            .time_bounds()
            .unwrap();

        assert!(bounds.contains(parse_timestamp("2024-01-01 00:00:00").unwrap()));
        assert!(bounds.contains(parse_timestamp("2024-01-01 23:59:59").unwrap()));
        assert!(!bounds.contains(parse_timestamp("2024-01-02 00:00:00").unwrap()));
    }

    #[test]
    fn test_unparsable_filter_names_field() {
        let err = FilterSpec::new()
            .with_start_date("yesterday-ish")
            .time_bounds()
            .unwrap_err();
        match err {
            AggregationError::UnparsableFilter { field, value } => {
                assert_eq!(field, "start_date");
                assert_eq!(value, "yesterday-ish");
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_inverted_range_rejected() {
        let result = FilterSpec::new()
            .with_start_date("2024-02-01")
            .with_end_date("2024-01-01")
            .time_bounds();
        assert!(matches!(
            result,
            Err(AggregationError::UnparsableFilter { field: "end_date", .. })
        ));
    }

    #[test]
    fn test_normalized_entity() {
        let filters = FilterSpec::new().with_entity("  INV-7 ");
        assert_eq!(filters.normalized_entity().as_deref(), Some("inv-7"));
        assert_eq!(FilterSpec::new().with_entity("  ").normalized_entity(), None);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_704_103_200_000), "2024-01-01 10:00:00");
    }
}
