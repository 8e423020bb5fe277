//! Time-bucket flooring
//!
//! Every bucket is identified by its start timestamp. Minute, hour and day
//! buckets are fixed-width; week buckets start on Monday 00:00 UTC and month
//! buckets on the first of the month, so those two need calendar arithmetic.

use chrono::{DateTime, Datelike, NaiveDate};

use crate::types::{Granularity, DAY_MS};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 3_600_000;

/// 1970-01-01 was a Thursday, three days after a Monday
const EPOCH_DAYS_AFTER_MONDAY: i64 = 3;

/// Start of the bucket containing `timestamp_ms`
///
/// Returns `None` only for timestamps outside chrono's representable range.
pub fn bucket_start(granularity: Granularity, timestamp_ms: i64) -> Option<i64> {
    match granularity {
        Granularity::Minute => Some(floor_to(timestamp_ms, MINUTE_MS)),
        Granularity::Hour => Some(floor_to(timestamp_ms, HOUR_MS)),
        Granularity::Day => Some(floor_to(timestamp_ms, DAY_MS)),
        Granularity::Week => {
            let day = timestamp_ms.div_euclid(DAY_MS);
            let monday = day - (day + EPOCH_DAYS_AFTER_MONDAY).rem_euclid(7);
            monday.checked_mul(DAY_MS)
        },
        Granularity::Month => {
            let dt = DateTime::from_timestamp_millis(timestamp_ms)?;
            let first = NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)?;
            Some(first.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
        },
    }
}

fn floor_to(timestamp_ms: i64, width_ms: i64) -> i64 {
    timestamp_ms.div_euclid(width_ms) * width_ms
}
