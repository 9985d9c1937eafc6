// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `fire(from)` (§4.4 Firing, testable property 7): the next instant strictly greater than
//! `from` satisfying a job's schedule. A job uses a five-field cron expression (minute hour
//! day-of-month month day-of-week, the unix crontab dialect) or a fixed interval, never both.
//!
//! The `cron` crate parses six-or-seven-field expressions with a leading seconds column, so a
//! five-field expression is adapted by pinning seconds to `0`.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use cron::Schedule;

use crate::error::SchedulerError;

/// Computes the next fire instant (milliseconds since the epoch) after `from_ms`, per exactly
/// one of `cron_expr`/`interval_seconds`.
pub fn fire(cron_expr: Option<&str>, interval_seconds: Option<i64>, from_ms: i64) -> Result<i64, SchedulerError> {
    if let Some(expr) = cron_expr {
        let schedule = parse_five_field(expr)?;
        let from = Utc
            .timestamp_millis_opt(from_ms)
            .single()
            .ok_or_else(|| SchedulerError::InvalidCron(expr.to_owned(), "timestamp out of range".to_owned()))?;
        let next = schedule
            .after(&from)
            .next()
            .ok_or_else(|| SchedulerError::InvalidCron(expr.to_owned(), "schedule never fires again".to_owned()))?;
        return Ok(next.timestamp_millis());
    }
    if let Some(interval) = interval_seconds {
        return Ok(from_ms + interval.saturating_mul(1000));
    }
    Err(SchedulerError::NoSchedule("<unspecified>".to_owned()))
}

fn parse_five_field(expr: &str) -> Result<Schedule, SchedulerError> {
    let six_field = format!("0 {expr}");
    Schedule::from_str(&six_field).map_err(|err| SchedulerError::InvalidCron(expr.to_owned(), err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_five_minutes_lands_on_a_five_minute_boundary() {
        // 2024-01-01T00:00:00Z in epoch millis.
        let from_ms = 1_704_067_200_000;
        let next = fire(Some("*/5 * * * *"), None, from_ms).unwrap();
        assert_eq!(next, from_ms + 5 * 60 * 1000);
    }

    #[test]
    fn fire_is_strictly_greater_than_from() {
        let from_ms = 1_704_067_200_000;
        let next = fire(Some("0 * * * *"), None, from_ms).unwrap();
        assert!(next > from_ms);
    }

    #[test]
    fn fire_is_deterministic_for_the_same_input() {
        let from_ms = 1_704_067_212_345;
        let a = fire(Some("*/10 * * * *"), None, from_ms).unwrap();
        let b = fire(Some("*/10 * * * *"), None, from_ms).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn interval_seconds_advances_by_the_fixed_amount() {
        let from_ms = 1_704_067_200_000;
        let next = fire(None, Some(30), from_ms).unwrap();
        assert_eq!(next, from_ms + 30_000);
    }

    #[test]
    fn neither_schedule_kind_is_an_error() {
        assert!(fire(None, None, 0).is_err());
    }

    #[test]
    fn invalid_cron_expression_is_rejected() {
        assert!(fire(Some("not a cron expr"), None, 0).is_err());
    }
}
