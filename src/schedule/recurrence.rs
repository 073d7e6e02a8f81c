/// Next-occurrence computation for recurring schedules
///
/// Deterministic and timezone-naive: `hour`/`minute` arrive already
/// localized by the caller, so all arithmetic happens on a single
/// timeline. Every rule yields an instant strictly after `now`.
///
/// CRON delegates to the `cron` crate's `Schedule` (seconds-bearing
/// expressions, e.g. "0 */5 * * * *"); swapping in a different cron
/// dialect means replacing that one code path.

use crate::error::{EngineError, Result};
use crate::schedule::store::{IntervalUnit, ScheduleType, ScheduledWorkflow};
use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Utc};
use std::str::FromStr;

/// Compute the instant of the schedule's next firing, strictly after `now`.
pub fn next_occurrence(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match schedule.schedule_type {
        ScheduleType::Interval => next_interval(schedule, now),
        ScheduleType::Daily => next_daily(schedule, now),
        ScheduleType::Weekly => next_weekly(schedule, now),
        ScheduleType::Monthly => next_monthly(schedule, now),
        ScheduleType::Cron => next_cron(schedule, now),
    }
}

fn next_interval(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let value = schedule
        .interval_value
        .filter(|v| *v > 0)
        .ok_or_else(|| missing(schedule, "positive interval_value"))?;
    let unit = schedule
        .interval_unit
        .ok_or_else(|| missing(schedule, "interval_unit"))?;

    let step = match unit {
        IntervalUnit::Minutes => Duration::minutes(value),
        IntervalUnit::Hours => Duration::hours(value),
        IntervalUnit::Days => Duration::days(value),
    };

    Ok(now + step)
}

fn next_daily(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let (hour, minute) = time_of_day(schedule)?;

    let today = at_time(schedule, now.date_naive(), hour, minute)?;
    if today > now {
        return Ok(today);
    }

    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .ok_or_else(|| out_of_range(schedule))?;
    at_time(schedule, tomorrow, hour, minute)
}

fn next_weekly(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let (hour, minute) = time_of_day(schedule)?;
    let days_of_week = schedule
        .days_of_week
        .as_ref()
        .filter(|days| !days.is_empty())
        .ok_or_else(|| missing(schedule, "days_of_week"))?;

    // Scan forward up to a week; 0 = Sunday matches the stored convention.
    for offset in 0..7 {
        let date = now
            .date_naive()
            .checked_add_days(Days::new(offset))
            .ok_or_else(|| out_of_range(schedule))?;
        if days_of_week.contains(&date.weekday().num_days_from_sunday()) {
            let candidate = at_time(schedule, date, hour, minute)?;
            if candidate > now {
                return Ok(candidate);
            }
        }
    }

    let next_week = now
        .date_naive()
        .checked_add_days(Days::new(7))
        .ok_or_else(|| out_of_range(schedule))?;
    at_time(schedule, next_week, hour, minute)
}

fn next_monthly(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let (hour, minute) = time_of_day(schedule)?;
    let day_of_month = schedule
        .day_of_month
        .filter(|d| (1..=31).contains(d))
        .ok_or_else(|| missing(schedule, "day_of_month between 1 and 31"))?;

    let this_month = clamped_date(schedule, now.year(), now.month(), day_of_month)?;
    let candidate = at_time(schedule, this_month, hour, minute)?;
    if candidate > now {
        return Ok(candidate);
    }

    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let next_month = clamped_date(schedule, year, month, day_of_month)?;
    at_time(schedule, next_month, hour, minute)
}

fn next_cron(schedule: &ScheduledWorkflow, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let expression = schedule
        .cron_expression
        .as_deref()
        .ok_or_else(|| missing(schedule, "cron_expression"))?;

    let parsed = cron::Schedule::from_str(expression).map_err(|e| {
        EngineError::Scheduling(format!(
            "schedule {}: invalid cron expression '{}': {}",
            schedule.id, expression, e
        ))
    })?;

    parsed.after(&now).next().ok_or_else(|| {
        EngineError::Scheduling(format!(
            "schedule {}: cron expression '{}' has no upcoming occurrence",
            schedule.id, expression
        ))
    })
}

fn time_of_day(schedule: &ScheduledWorkflow) -> Result<(u32, u32)> {
    let hour = schedule
        .hour
        .filter(|h| *h < 24)
        .ok_or_else(|| missing(schedule, "hour between 0 and 23"))?;
    let minute = schedule
        .minute
        .filter(|m| *m < 60)
        .ok_or_else(|| missing(schedule, "minute between 0 and 59"))?;
    Ok((hour, minute))
}

fn at_time(
    schedule: &ScheduledWorkflow,
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| out_of_range(schedule))
}

/// Date for `(year, month, day)` with `day` clamped to the month's last day.
fn clamped_date(
    schedule: &ScheduledWorkflow,
    year: i32,
    month: u32,
    day: u32,
) -> Result<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .ok_or_else(|| out_of_range(schedule))?
        .day();

    NaiveDate::from_ymd_opt(year, month, day.min(last_day)).ok_or_else(|| out_of_range(schedule))
}

fn missing(schedule: &ScheduledWorkflow, what: &str) -> EngineError {
    EngineError::Scheduling(format!(
        "schedule {} ({}) requires {}",
        schedule.id,
        schedule.schedule_type.as_str(),
        what
    ))
}

fn out_of_range(schedule: &ScheduledWorkflow) -> EngineError {
    EngineError::Scheduling(format!("schedule {}: computed date out of range", schedule.id))
}
