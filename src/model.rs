use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

pub const MS_PER_SECOND: Ms = 1_000;
pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// Seconds-since-midnight values are restricted to `0..SECS_PER_DAY`.
pub const SECS_PER_DAY: u32 = 86_400;

/// Half-open interval `[start, end)`. Empty spans (`start == end`) are legal;
/// they show up transiently while carving exclusions and are dropped before
/// results leave the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Calendar arithmetic ──────────────────────────────────────────

/// Days of the week in the canonical calendar order (Sunday = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn index(self) -> u8 {
        match self {
            Weekday::Sunday => 0,
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
        }
    }

    pub fn from_index(i: u8) -> Option<Weekday> {
        Weekday::ALL.get(i as usize).copied()
    }

    pub fn of(date: NaiveDate) -> Weekday {
        // chrono guarantees num_days_from_sunday() is 0..=6.
        Weekday::ALL[date.weekday().num_days_from_sunday() as usize]
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Calendar day containing the instant. All calendar math is UTC — there is
/// no timezone conversion anywhere in the engine.
pub fn date_of(at: Ms) -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive() + Duration::days(at.div_euclid(MS_PER_DAY))
}

/// Midnight of `date` as an instant.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Seconds since midnight of the day containing `at`.
pub fn seconds_of_day(at: Ms) -> u32 {
    (at.rem_euclid(MS_PER_DAY) / MS_PER_SECOND) as u32
}

/// Time-of-day window in seconds since midnight, `start_sec <= end_sec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start_sec: u32,
    pub end_sec: u32,
}

/// Anchor a time-of-day window onto a concrete calendar day.
pub fn span_on(date: NaiveDate, window: DayWindow) -> Span {
    let base = day_start_ms(date);
    Span::new(
        base + window.start_sec as Ms * MS_PER_SECOND,
        base + window.end_sec as Ms * MS_PER_SECOND,
    )
}

// ── Domain records ───────────────────────────────────────────────

/// One recurring weekly availability row. Both times absent means the
/// weekday is configured but closed — distinct from having no row at all.
/// Exactly one time present is an invalid half-filled form submission; it is
/// rejected at write time and excluded (flagged) if it ever reaches
/// resolution through an external snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub id: Ulid,
    pub weekday: Weekday,
    pub start_sec: Option<u32>,
    pub end_sec: Option<u32>,
}

impl RecurringRule {
    /// The open window, if the row is completely filled in.
    pub fn day_window(&self) -> Option<DayWindow> {
        match (self.start_sec, self.end_sec) {
            (Some(start_sec), Some(end_sec)) => Some(DayWindow { start_sec, end_sec }),
            _ => None,
        }
    }

    pub fn is_incomplete(&self) -> bool {
        self.start_sec.is_some() != self.end_sec.is_some()
    }
}

/// Date-anchored one-off override. `exclusive` carves time out of the
/// recurring schedule; non-exclusive adds a window that replaces the
/// recurring schedule for that day entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub id: Ulid,
    pub span: Span,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentType {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub duration_min: u32,
    pub price_cents: Option<i64>,
}

impl AppointmentType {
    pub fn duration_ms(&self) -> Ms {
        self.duration_min as Ms * MS_PER_MINUTE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub span: Span,
    pub appointment_type_id: Ulid,
    pub customer_id: Ulid,
}

/// Everything one provider owns. The resolver only ever sees a single
/// provider's records — there is no cross-provider interval math.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Recurring weekly rows, sorted by weekday index.
    pub schedule: Vec<RecurringRule>,
    /// One-off overrides, sorted by `span.start`.
    pub modifiers: Vec<Modifier>,
    pub appointment_types: Vec<AppointmentType>,
    /// Confirmed appointments, sorted by `span.start`.
    pub appointments: Vec<Appointment>,
}

impl ProviderState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            schedule: Vec::new(),
            modifiers: Vec::new(),
            appointment_types: Vec::new(),
            appointments: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.schedule.len()
            + self.modifiers.len()
            + self.appointment_types.len()
            + self.appointments.len()
    }

    /// Insert a recurring row keeping weekday order.
    pub fn insert_rule(&mut self, rule: RecurringRule) {
        let pos = self
            .schedule
            .partition_point(|r| r.weekday.index() <= rule.weekday.index());
        self.schedule.insert(pos, rule);
    }

    pub fn remove_rule(&mut self, id: Ulid) -> Option<RecurringRule> {
        let pos = self.schedule.iter().position(|r| r.id == id)?;
        Some(self.schedule.remove(pos))
    }

    pub fn rule_mut(&mut self, id: Ulid) -> Option<&mut RecurringRule> {
        self.schedule.iter_mut().find(|r| r.id == id)
    }

    /// Insert a modifier maintaining sort order by `span.start`.
    pub fn insert_modifier(&mut self, modifier: Modifier) {
        let pos = self
            .modifiers
            .binary_search_by_key(&modifier.span.start, |m| m.span.start)
            .unwrap_or_else(|e| e);
        self.modifiers.insert(pos, modifier);
    }

    pub fn remove_modifier(&mut self, id: Ulid) -> Option<Modifier> {
        let pos = self.modifiers.iter().position(|m| m.id == id)?;
        Some(self.modifiers.remove(pos))
    }

    pub fn insert_type(&mut self, ty: AppointmentType) {
        self.appointment_types.push(ty);
    }

    pub fn remove_type(&mut self, id: Ulid) -> Option<AppointmentType> {
        let pos = self.appointment_types.iter().position(|t| t.id == id)?;
        Some(self.appointment_types.remove(pos))
    }

    pub fn type_by_id(&self, id: Ulid) -> Option<&AppointmentType> {
        self.appointment_types.iter().find(|t| t.id == id)
    }

    /// Insert an appointment maintaining sort order by `span.start`.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    /// Appointments whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping_appointments(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }
}

// ── Events ───────────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderCreated {
        id: Ulid,
        name: Option<String>,
    },
    ProviderRenamed {
        id: Ulid,
        name: Option<String>,
    },
    ProviderDeleted {
        id: Ulid,
    },
    RuleAdded {
        id: Ulid,
        provider_id: Ulid,
        weekday: Weekday,
        start_sec: Option<u32>,
        end_sec: Option<u32>,
    },
    RuleUpdated {
        id: Ulid,
        provider_id: Ulid,
        start_sec: Option<u32>,
        end_sec: Option<u32>,
    },
    RuleRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    ModifierAdded {
        id: Ulid,
        provider_id: Ulid,
        span: Span,
        exclusive: bool,
    },
    ModifierRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    TypeAdded {
        id: Ulid,
        provider_id: Ulid,
        name: String,
        description: Option<String>,
        duration_min: u32,
        price_cents: Option<i64>,
    },
    TypeRemoved {
        id: Ulid,
        provider_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        provider_id: Ulid,
        span: Span,
        appointment_type_id: Ulid,
        customer_id: Ulid,
    },
    AppointmentCancelled {
        id: Ulid,
        provider_id: Ulid,
        customer_id: Ulid,
        span: Span,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

/// Editor row for the weekly-schedule form. Placeholder rows synthesized for
/// weekdays without a stored record carry `id == None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub id: Option<Ulid>,
    pub provider_id: Ulid,
    pub weekday: Weekday,
    pub start_sec: Option<u32>,
    pub end_sec: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierInfo {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentTypeInfo {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub duration_min: u32,
    pub price_cents: Option<i64>,
}

/// What a committed calendar click did: toggled modifiers off, or one on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub deleted: Vec<Ulid>,
    pub created: Option<ModifierInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentInfo {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub appointment_type_id: Ulid,
    pub customer_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}
