//! Calendar-aware bucket boundaries.
//!
//! Instants are floored to the start of the bucket that contains them,
//! stepped forward one bucket at a time, and enumerated into timelines. All
//! arithmetic happens in the zone the instant already carries; callers
//! convert with [`crate::Config::location`] first.
//!
//! Flooring is phase-anchored per unit: clock units floor their field to a
//! multiple of the offset, days anchor to January 1st (so multi-day buckets
//! reset phase at year boundaries), weeks anchor to the first complete week
//! of the year starting on the configured weekday, and months, quarters and
//! years floor their calendar index.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Weekday,
};
use chrono_tz::Tz;

use crate::granularity::Unit;

/// Floors an instant to the boundary of its bucket.
#[must_use]
pub fn floor(at: DateTime<Tz>, offset: u32, unit: Unit, week_start: Weekday) -> DateTime<Tz> {
    let tz = at.timezone();
    let step = i64::from(offset.max(1));
    match unit {
        Unit::Second => {
            let second = to_u32(i64::from(at.second()) / step * step);
            clock(tz, at.date_naive(), at.hour(), at.minute(), second)
        }
        Unit::Minute => {
            let minute = to_u32(i64::from(at.minute()) / step * step);
            clock(tz, at.date_naive(), at.hour(), minute, 0)
        }
        Unit::Hour => {
            let hour = to_u32(i64::from(at.hour()) / step * step);
            clock(tz, at.date_naive(), hour, 0, 0)
        }
        Unit::Day => {
            let ordinal = i64::from(at.ordinal0()) / step * step;
            let date = NaiveDate::from_yo_opt(at.year(), to_u32(ordinal + 1))
                .unwrap_or_else(|| at.date_naive());
            midnight(tz, date)
        }
        Unit::Week => floor_week(at, step, week_start),
        Unit::Month => {
            let month0 = i64::from(at.month0()) / step * step;
            month_start(tz, at.year(), to_u32(month0 + 1))
        }
        Unit::Quarter => {
            let quarter = i64::from(at.month0()) / 3 / step * step;
            month_start(tz, at.year(), to_u32(quarter * 3 + 1))
        }
        Unit::Year => {
            let year = i64::from(at.year()) / step * step;
            let date = NaiveDate::from_ymd_opt(year as i32, 1, 1)
                .unwrap_or_else(|| at.date_naive());
            midnight(tz, date)
        }
    }
}

/// Steps an instant forward by one bucket width.
///
/// Clock units, days and weeks advance by a fixed duration; months,
/// quarters and years advance on the calendar and clamp the day of month to
/// the last valid day of the target month.
#[must_use]
pub fn step(at: DateTime<Tz>, offset: u32, unit: Unit) -> DateTime<Tz> {
    let amount = i64::from(offset);
    if amount == 0 {
        return at;
    }
    match unit {
        Unit::Second => at + Duration::seconds(amount),
        Unit::Minute => at + Duration::minutes(amount),
        Unit::Hour => at + Duration::hours(amount),
        Unit::Day => at + Duration::days(amount),
        Unit::Week => at + Duration::weeks(amount),
        Unit::Month => add_months(at, amount),
        Unit::Quarter => add_months(at, amount * 3),
        Unit::Year => add_months(at, amount * 12),
    }
}

/// Enumerates the ascending bucket boundaries from `floor(from)` through
/// `floor(to)` inclusive. Empty when `floor(to) < floor(from)`.
#[must_use]
pub fn timeline(
    from: DateTime<Tz>,
    to: DateTime<Tz>,
    offset: u32,
    unit: Unit,
    week_start: Weekday,
) -> Vec<DateTime<Tz>> {
    let start = floor(from, offset, unit, week_start);
    let end = floor(to, offset, unit, week_start);

    let mut points = Vec::new();
    let mut current = start;
    while current <= end {
        points.push(current);
        let next = step(current, offset, unit);
        if next <= current {
            break;
        }
        current = next;
    }
    points
}

fn floor_week(at: DateTime<Tz>, step: i64, week_start: Weekday) -> DateTime<Tz> {
    let tz = at.timezone();
    let year_start =
        NaiveDate::from_ymd_opt(at.year(), 1, 1).unwrap_or_else(|| at.date_naive());

    let anchor = i64::from(week_start.num_days_from_sunday());
    let start_weekday = i64::from(year_start.weekday().num_days_from_sunday());
    let days_to_first = (anchor - start_weekday).rem_euclid(7);
    let first_week = year_start + Duration::days(days_to_first);
    let first_week_start = midnight(tz, first_week);

    // Days before the first complete week collapse into a stub bucket at
    // January 1st.
    if at < first_week_start {
        return midnight(tz, year_start);
    }

    let weeks = (at - first_week_start).num_seconds() / (7 * 86_400);
    let floored = weeks / step * step;
    midnight(tz, first_week + Duration::days(floored * 7))
}

fn add_months(at: DateTime<Tz>, months: i64) -> DateTime<Tz> {
    let tz = at.timezone();
    let total = i64::from(at.year()) * 12 + i64::from(at.month0()) + months;
    let year = total.div_euclid(12) as i32;
    let month = to_u32(total.rem_euclid(12) + 1);

    let day = at.day().min(days_in_month(year, month));
    let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| at.date_naive());
    let time = NaiveTime::from_hms_nano_opt(at.hour(), at.minute(), at.second(), at.nanosecond())
        .unwrap_or(NaiveTime::MIN);
    localize(tz, NaiveDateTime::new(date, time))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

fn month_start(tz: Tz, year: i32, month: u32) -> DateTime<Tz> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default());
    midnight(tz, date)
}

fn clock(tz: Tz, date: NaiveDate, hour: u32, minute: u32, second: u32) -> DateTime<Tz> {
    let time = NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(NaiveTime::MIN);
    localize(tz, NaiveDateTime::new(date, time))
}

fn midnight(tz: Tz, date: NaiveDate) -> DateTime<Tz> {
    localize(tz, NaiveDateTime::new(date, NaiveTime::MIN))
}

/// Resolves a local wall-clock time in `tz`. Ambiguous times (DST fold)
/// take the earlier instant; times inside a DST gap resolve forward to the
/// first representable instant.
fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut probe = naive + Duration::minutes(30);
            loop {
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(instant) => return instant,
                    LocalResult::Ambiguous(earliest, _) => return earliest,
                    LocalResult::None => probe = probe + Duration::minutes(30),
                }
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Values derive from in-range clock/calendar fields
fn to_u32(value: i64) -> u32 {
    value as u32
}
