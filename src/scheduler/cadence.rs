//! Next-occurrence computation for schedule cadences.
//!
//! Pure calendar math over the single UTC reference clock; no I/O. The
//! returned instant is always strictly after `from`, so repeatedly feeding
//! the result back in walks forward through the schedule's occurrences.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::scheduler::types::Cadence;

/// Day-of-week used by weekly schedules when none is configured (Monday,
/// with 0 = Sunday).
const DEFAULT_DAY_OF_WEEK: i32 = 1;

/// Day-of-month used by monthly schedules when none is configured.
const DEFAULT_DAY_OF_MONTH: i32 = 1;

/// Compute the next occurrence of a schedule strictly after `from`.
///
/// `time_of_day` is an `HH:MM` wall-clock string; malformed or out-of-range
/// values fall back to 08:00. `day_of_week` (0-6, 0 = Sunday) only applies
/// to weekly cadences, `day_of_month` (1-31) only to monthly ones.
///
/// Monthly schedules clamp `day_of_month` to the length of each month
/// independently: a schedule for the 31st fires on Feb 28 (or 29), then
/// again on Mar 31. The clamp is re-derived every occurrence, never baked
/// into a fixed offset.
pub fn compute_next_run_at(
    cadence: Cadence,
    time_of_day: &str,
    day_of_week: Option<i32>,
    day_of_month: Option<i32>,
    from: NaiveDateTime,
) -> NaiveDateTime {
    let tod = parse_time_of_day(time_of_day);

    match cadence {
        Cadence::Daily => {
            let candidate = from.date().and_time(tod);
            if candidate > from {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }
        Cadence::Weekly => {
            let wanted = day_of_week.unwrap_or(DEFAULT_DAY_OF_WEEK).clamp(0, 6) as i64;
            let base = from.date().and_time(tod);
            let today = base.weekday().num_days_from_sunday() as i64;
            let candidate = base + Duration::days((wanted - today).rem_euclid(7));
            if candidate > from {
                candidate
            } else {
                candidate + Duration::days(7)
            }
        }
        Cadence::Monthly => {
            let wanted = day_of_month.unwrap_or(DEFAULT_DAY_OF_MONTH).clamp(1, 31) as u32;
            let candidate = clamped_date(from.year(), from.month(), wanted).and_time(tod);
            if candidate > from {
                candidate
            } else {
                let (year, month) = next_month(from.year(), from.month());
                clamped_date(year, month, wanted).and_time(tod)
            }
        }
    }
}

/// Parse `HH:MM` into a wall-clock time, defaulting to 08:00 on anything
/// malformed or out of range.
fn parse_time_of_day(raw: &str) -> NaiveTime {
    let mut parts = raw.trim().splitn(2, ':');
    let parsed = match (parts.next(), parts.next()) {
        (Some(hours), Some(minutes)) => hours
            .parse::<u32>()
            .ok()
            .zip(minutes.parse::<u32>().ok())
            .and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
        _ => None,
    };
    parsed.unwrap_or_else(default_time_of_day)
}

fn default_time_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).expect("08:00 is a valid wall-clock time")
}

/// The given day of the given month, clamped to that month's length.
fn clamped_date(year: i32, month: u32, wanted_day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, wanted_day)
        .unwrap_or_else(|| last_day_of_month(year, month))
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = next_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("first of month is always a valid date")
        - Duration::days(1)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}
