// src/day_span.rs
//
// Calendar-day arithmetic. Every bound is normalized to local midnight before
// counting, so sub-day timestamps and DST transitions never shift a count.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};

/// First instant of `day` in `tz`, as UTC.
pub fn start_of_day<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight falls in a DST gap: the day starts at the first valid hour.
        LocalResult::None => (1..=3)
            .find_map(|h| tz.from_local_datetime(&(midnight + Duration::hours(h))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
    }
}

/// Half-open UTC range `[day 00:00, day+1 00:00)` in `tz`.
pub fn day_bounds<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = day.succ_opt().unwrap_or(NaiveDate::MAX);
    (start_of_day(day, tz), start_of_day(next, tz))
}

/// Calendar day of `ts` as seen in `tz`.
pub fn local_day<Tz: TimeZone>(ts: &DateTime<Utc>, tz: &Tz) -> NaiveDate {
    ts.with_timezone(tz).date_naive()
}

/// Inclusive number of calendar days between two instants, always >= 1.
pub fn days_inclusive<Tz: TimeZone>(start: &DateTime<Utc>, end: &DateTime<Utc>, tz: &Tz) -> i64 {
    days_inclusive_dates(local_day(start, tz), local_day(end, tz))
}

pub fn days_inclusive_dates(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days().abs() + 1
}

pub fn is_within_day<Tz: TimeZone>(ts: &DateTime<Utc>, day: NaiveDate, tz: &Tz) -> bool {
    let (from, to) = day_bounds(day, tz);
    *ts >= from && *ts < to
}

/// Start of the calendar month containing `now` in `tz`.
pub fn month_start<Tz: TimeZone>(now: &DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let today = local_day(now, tz);
    let first = today.with_day(1).unwrap_or(today);
    start_of_day(first, tz)
}
