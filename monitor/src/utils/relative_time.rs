//! Strict relative-time phrases.
//!
//! Distances are rendered in a single unit chosen from the size of the gap
//! (`"45 seconds"`, `"5 minutes"`, `"3 hours"`, `"2 days"`, `"4 months"`,
//! `"1 year"`), with no "about"/"almost" qualifiers and no direction. Callers
//! add their own framing ("started ...", "ending in ...").
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use flowbar_monitor::utils::relative_time::distance_strict;
//!
//! let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
//! assert_eq!(distance_strict(start, start + Duration::minutes(5)), "5 minutes");
//! assert_eq!(distance_strict(start + Duration::hours(3), start), "3 hours");
//! ```

use chrono::{DateTime, Utc};

const MINUTES_IN_HOUR: f64 = 60.0;
const MINUTES_IN_DAY: f64 = 1_440.0;
const MINUTES_IN_MONTH: f64 = 43_200.0;
const MINUTES_IN_YEAR: f64 = 525_600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Unit {
    fn label(self, value: u64) -> &'static str {
        let singular = value == 1;
        match (self, singular) {
            (Self::Second, true) => "second",
            (Self::Second, false) => "seconds",
            (Self::Minute, true) => "minute",
            (Self::Minute, false) => "minutes",
            (Self::Hour, true) => "hour",
            (Self::Hour, false) => "hours",
            (Self::Day, true) => "day",
            (Self::Day, false) => "days",
            (Self::Month, true) => "month",
            (Self::Month, false) => "months",
            (Self::Year, true) => "year",
            (Self::Year, false) => "years",
        }
    }
}

/// Formats the absolute distance between two instants in a single unit.
///
/// The order of the arguments does not matter. Values are rounded to the
/// nearest whole unit; twelve rounded months are reported as `"1 year"`.
#[must_use]
pub fn distance_strict(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let millis = (to - from).num_milliseconds().unsigned_abs() as f64;
    let minutes = millis / 60_000.0;

    let (value, unit) = if minutes < 1.0 {
        ((millis / 1_000.0).round(), Unit::Second)
    } else if minutes < MINUTES_IN_HOUR {
        (minutes.round(), Unit::Minute)
    } else if minutes < MINUTES_IN_DAY {
        ((minutes / MINUTES_IN_HOUR).round(), Unit::Hour)
    } else if minutes < MINUTES_IN_MONTH {
        ((minutes / MINUTES_IN_DAY).round(), Unit::Day)
    } else if minutes < MINUTES_IN_YEAR {
        let months = (minutes / MINUTES_IN_MONTH).round();
        if months >= 12.0 {
            (1.0, Unit::Year)
        } else {
            (months, Unit::Month)
        }
    } else {
        ((minutes / MINUTES_IN_YEAR).round(), Unit::Year)
    };

    let value = value as u64;
    format!("{value} {}", unit.label(value))
}

/// Formats the distance between `at` and `now`.
#[must_use]
pub fn distance_to_now_strict(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    distance_strict(at, now)
}
