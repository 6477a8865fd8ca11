//! Next-run arithmetic
//!
//! Interval schedules advance from the completion time; time-of-day
//! schedules find the next wall-clock occurrence (UTC), honoring the
//! weekday mask. A recomputed time already in the past (clock jumps,
//! long runs) is clamped to one minute from now.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};

use thoth_core::source_config::Schedule;

/// Compute `next_run_at` after a run completed at `completed_at`.
pub fn compute_next_run(
    schedule: &Schedule,
    completed_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let candidate = match (schedule.time_of_day_parsed(), schedule.interval_minutes) {
        (Some(tod), _) => next_time_of_day(schedule, completed_at, tod),
        (None, Some(minutes)) => completed_at + Duration::minutes(i64::from(minutes)),
        // Validation guarantees one of the two is set.
        (None, None) => completed_at + Duration::days(1),
    };
    if candidate <= now {
        now + Duration::minutes(1)
    } else {
        candidate
    }
}

/// Next wall-clock occurrence of `tod` strictly after `after`, advancing
/// day by day until the weekday mask allows it.
fn next_time_of_day(schedule: &Schedule, after: DateTime<Utc>, tod: NaiveTime) -> DateTime<Utc> {
    let mut day = after.date_naive();
    let mut candidate = day.and_time(tod).and_utc();
    if candidate <= after {
        day = day.succ_opt().unwrap_or(day);
        candidate = day.and_time(tod).and_utc();
    }
    // A non-empty weekday mask matches within a week; 8 tries cover it.
    for _ in 0..8 {
        if schedule.day_enabled(candidate.weekday()) {
            return candidate;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => return candidate,
        };
        candidate = day.and_time(tod).and_utc();
    }
    candidate
}
