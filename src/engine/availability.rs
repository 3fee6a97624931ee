use chrono::NaiveDate;

use crate::model::*;

use super::classify::{classify, IntervalRelation};
use super::schedule::day_windows;

// ── Availability Resolution ──────────────────────────────────────

/// Compute the open, non-excluded windows of one calendar day for one
/// provider, as concrete instants.
///
/// Same-day non-exclusive modifiers REPLACE the recurring schedule outright
/// (and mute same-day exclusions): a provider adding explicit windows for a
/// date opts out of derived recurring logic for that date entirely.
/// Otherwise the recurring windows for the weekday are seeded and every
/// same-day exclusive modifier is carved out of them.
///
/// Exclusions apply one at a time in stored order against the current
/// fragment list; overlapping exclusions can therefore produce
/// order-dependent fragments. No canonical ordering is imposed here.
///
/// Returns fragments in carve order, not sorted; display paths sort by start.
pub fn resolve_day(
    date: NaiveDate,
    schedule: &[RecurringRule],
    modifiers: &[Modifier],
    now: Ms,
) -> Vec<Span> {
    // Days before the resolution instant are never offered.
    if date < date_of(now) {
        return Vec::new();
    }

    let mut additions: Vec<Span> = Vec::new();
    let mut exclusions: Vec<&Modifier> = Vec::new();
    for modifier in modifiers {
        if date_of(modifier.span.start) != date {
            continue;
        }
        if modifier.exclusive {
            exclusions.push(modifier);
        } else {
            additions.push(modifier.span);
        }
    }

    if !additions.is_empty() {
        return additions;
    }

    let weekday = Weekday::of(date);
    if !schedule.iter().any(|r| r.weekday == weekday) {
        return Vec::new();
    }

    let (windows, _faults) = day_windows(schedule, weekday);
    let mut open: Vec<Span> = windows.into_iter().map(|w| span_on(date, w)).collect();

    for exclusion in &exclusions {
        let carved = reanchor(date, &exclusion.span);
        open = carve_out(open, &carved);
    }

    open.retain(|span| !span.is_empty());
    open
}

/// Map an exclusion onto `date` keeping only its time of day — the stored
/// date component is discarded. An end landing at or before the start's
/// time of day (midnight wrap) rolls into the next day.
fn reanchor(date: NaiveDate, span: &Span) -> Span {
    let base = day_start_ms(date);
    let start = base + seconds_of_day(span.start) as Ms * MS_PER_SECOND;
    let mut end = base + seconds_of_day(span.end) as Ms * MS_PER_SECOND;
    if end < start {
        end += MS_PER_DAY;
    }
    Span::new(start, end)
}

/// Apply one exclusion to every open fragment. Only exclusions that sit
/// exactly on a fragment (equal), strictly inside it, or flush with one of
/// its edges carve anything; a partial overlap that crosses a fragment edge
/// matches no classification bucket and leaves the fragment untouched.
fn carve_out(open: Vec<Span>, exclusion: &Span) -> Vec<Span> {
    let mut next = Vec::with_capacity(open.len() + 1);
    for window in open {
        match classify(&window, exclusion) {
            Some(
                IntervalRelation::Equal
                | IntervalRelation::Inclusive
                | IntervalRelation::AdjacentInclusiveStart
                | IntervalRelation::AdjacentInclusiveEnd,
            ) => {
                // Lead-in before the exclusion, tail after it. Pieces that
                // would be empty or inverted are not emitted.
                if window.start < exclusion.start {
                    next.push(Span::new(window.start, exclusion.start));
                }
                if exclusion.end < window.end {
                    next.push(Span::new(exclusion.end, window.end));
                }
            }
            _ => next.push(window),
        }
    }
    next
}
