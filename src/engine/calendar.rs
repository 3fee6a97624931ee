use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::resolve_day;
use super::classify::bucketize;
use super::schedule::in_business_hours;
use super::slot::chunk_all;
use super::EngineError;

// ── Day Availability Adapter ─────────────────────────────────────

/// Calendar-day predicate driving day disabling in the booking UI.
pub fn has_availability(
    date: NaiveDate,
    schedule: &[RecurringRule],
    modifiers: &[Modifier],
    now: Ms,
) -> bool {
    !resolve_day(date, schedule, modifiers, now).is_empty()
}

/// Bookable slots for one day and one appointment duration: every resolved
/// window chunked, windows visited in start order.
pub fn day_slots(
    date: NaiveDate,
    schedule: &[RecurringRule],
    modifiers: &[Modifier],
    duration_ms: Ms,
    now: Ms,
) -> Result<Vec<Span>, EngineError> {
    let mut open = resolve_day(date, schedule, modifiers, now);
    open.sort_by_key(|span| span.start);
    chunk_all(&open, duration_ms)
}

// ── Modifier Toggle ──────────────────────────────────────────────

/// Probe width for a calendar click when no explicit slot size is given.
pub const DEFAULT_TOGGLE_SLOT_MS: Ms = 30 * MS_PER_MINUTE;

/// A modifier the toggle wants created. The caller assigns the id when it
/// commits the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewModifier {
    pub span: Span,
    pub exclusive: bool,
}

/// What a calendar click should do to the modifier set. Either a list of
/// modifiers to delete (toggle off) or a single modifier to create (toggle
/// on) — never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TogglePlan {
    pub delete: Vec<Ulid>,
    pub create: Option<NewModifier>,
}

/// Classify a clicked instant against the existing modifiers.
///
/// The click is widened to a `[instant, instant + slot_ms)` probe. Every
/// modifier matching the probe exactly is deleted. Otherwise a new modifier
/// spanning the probe is created; it blacks time out when the click lands
/// inside the provider's recurring hours and adds time when it lands
/// outside them.
pub fn toggle_at(
    instant: Ms,
    slot_ms: Ms,
    schedule: &[RecurringRule],
    modifiers: &[Modifier],
) -> TogglePlan {
    debug_assert!(slot_ms > 0, "toggle probe must have positive width");
    let probe = Span::new(instant, instant + slot_ms);

    let buckets = bucketize(&probe, modifiers.iter().map(|m| &m.span));
    if !buckets.equal.is_empty() {
        return TogglePlan {
            delete: buckets.equal.iter().map(|&i| modifiers[i].id).collect(),
            create: None,
        };
    }

    let weekday = Weekday::of(date_of(instant));
    let exclusive = in_business_hours(schedule, weekday, seconds_of_day(instant));
    TogglePlan {
        delete: Vec::new(),
        create: Some(NewModifier {
            span: probe,
            exclusive,
        }),
    }
}
