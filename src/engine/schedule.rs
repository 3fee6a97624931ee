use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Recurring Availability Store ─────────────────────────────────

/// Complete windows for one weekday, plus the ids of half-filled rows that
/// had to be excluded. Write paths reject half-filled rows outright, so
/// faults only appear when resolving a snapshot that bypassed validation.
pub fn day_windows(schedule: &[RecurringRule], weekday: Weekday) -> (Vec<DayWindow>, Vec<Ulid>) {
    let mut windows = Vec::new();
    let mut faults = Vec::new();
    for rule in schedule.iter().filter(|r| r.weekday == weekday) {
        if rule.is_incomplete() {
            faults.push(rule.id);
        } else if let Some(window) = rule.day_window() {
            windows.push(window);
        }
        // both-absent rows contribute nothing: configured but closed
    }
    (windows, faults)
}

/// Weekdays with no stored row at all. Editor scaffolding only — resolution
/// treats "no row" and "row present but blank" identically (both empty), so
/// this set never feeds into day resolution.
pub fn missing_weekdays(schedule: &[RecurringRule]) -> HashSet<Weekday> {
    let mut missing: HashSet<Weekday> = Weekday::ALL.into_iter().collect();
    for rule in schedule {
        missing.remove(&rule.weekday);
    }
    missing
}

/// Whether a time of day falls inside any complete recurring window for the
/// weekday. Drives the polarity of calendar-click modifiers.
pub fn in_business_hours(schedule: &[RecurringRule], weekday: Weekday, sec_of_day: u32) -> bool {
    let (windows, _) = day_windows(schedule, weekday);
    windows
        .iter()
        .any(|w| w.start_sec <= sec_of_day && sec_of_day < w.end_sec)
}

/// The weekly-editor view: one row per stored record plus a blank
/// placeholder row for every missing weekday, in canonical weekday order.
pub fn editor_rows(provider_id: Ulid, schedule: &[RecurringRule]) -> Vec<ScheduleRow> {
    let missing = missing_weekdays(schedule);
    let mut rows: Vec<ScheduleRow> = schedule
        .iter()
        .map(|r| ScheduleRow {
            id: Some(r.id),
            provider_id,
            weekday: r.weekday,
            start_sec: r.start_sec,
            end_sec: r.end_sec,
        })
        .collect();
    for weekday in Weekday::ALL {
        if missing.contains(&weekday) {
            rows.push(ScheduleRow {
                id: None,
                provider_id,
                weekday,
                start_sec: None,
                end_sec: None,
            });
        }
    }
    rows.sort_by_key(|r| r.weekday.index());
    rows
}

/// Validate a submitted weekly row. Half-filled rows are a form error, not
/// something to coerce; out-of-range or inverted times are rejected too.
pub fn validate_rule_times(
    weekday: Weekday,
    start_sec: Option<u32>,
    end_sec: Option<u32>,
) -> Result<(), EngineError> {
    match (start_sec, end_sec) {
        (None, None) => Ok(()),
        (Some(start), Some(end)) => {
            if start >= SECS_PER_DAY || end >= SECS_PER_DAY {
                return Err(EngineError::InvalidWindow(
                    "seconds-of-day out of 0..86400",
                ));
            }
            if start > end {
                return Err(EngineError::InvalidWindow("window start after end"));
            }
            Ok(())
        }
        _ => Err(EngineError::IncompleteRule(weekday)),
    }
}
