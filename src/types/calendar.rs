//! Relative date-window computation
//!
//! Shared by the compiler (which lowers window operators to boundary
//! comparisons against the wall-clock date) and the evaluator (which tests
//! values against the same window).

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

pub(crate) const WINDOW_OPS: &[&str] = &[
    "thisyear",
    "lastyear",
    "thismonth",
    "lastmonth",
    "today",
    "yesterday",
    "last7days",
    "last30days",
    "last365days",
];

pub(crate) fn is_window_op(op: &str) -> bool {
    WINDOW_OPS.contains(&op)
}

/// Inclusive date bounds of a relative window, anchored at `today`.
pub(crate) fn date_window(op: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    match op {
        "today" => Some((today, today)),
        "yesterday" => {
            let y = today - Duration::days(1);
            Some((y, y))
        }
        "last7days" => Some((today - Duration::days(6), today)),
        "last30days" => Some((today - Duration::days(29), today)),
        "last365days" => Some((today - Duration::days(364), today)),
        "thismonth" => month_bounds(today.year(), today.month()),
        "lastmonth" => {
            let (year, month) = if today.month() == 1 {
                (today.year() - 1, 12)
            } else {
                (today.year(), today.month() - 1)
            };
            month_bounds(year, month)
        }
        "thisyear" => year_bounds(today.year()),
        "lastyear" => year_bounds(today.year() - 1),
        _ => None,
    }
}

/// First instant of a day, for widening a date bound to a datetime bound.
pub(crate) fn day_start(d: NaiveDate) -> NaiveDateTime {
    d.and_time(NaiveTime::MIN)
}

/// Last whole second of a day.
pub(crate) fn day_end(d: NaiveDate) -> NaiveDateTime {
    d.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next - Duration::days(1)))
}

fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}
