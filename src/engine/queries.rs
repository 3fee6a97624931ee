use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::schedule::{day_windows, editor_rows};
use super::{availability, calendar, Engine, EngineError};

impl Engine {
    /// Open, non-excluded windows of one day, sorted by start for display.
    /// An unknown provider has no availability rather than being an error —
    /// booking pages commonly race provider deletion.
    pub async fn resolve_day(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(Vec::new()),
        };
        let guard = ps.read().await;

        let (_, faults) = day_windows(&guard.schedule, Weekday::of(date));
        if !faults.is_empty() {
            tracing::warn!(
                "provider {provider_id} has incomplete schedule rows {faults:?}, excluded from resolution"
            );
        }

        let mut open = availability::resolve_day(date, &guard.schedule, &guard.modifiers, now_ms());
        open.sort_by_key(|span| span.start);
        Ok(open)
    }

    /// Calendar-day predicate: does the day offer any open time at all?
    pub async fn has_availability(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
    ) -> Result<bool, EngineError> {
        Ok(!self.resolve_day(provider_id, date).await?.is_empty())
    }

    /// Bookable slots of one day for one appointment type.
    pub async fn day_slots(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        appointment_type_id: Ulid,
    ) -> Result<Vec<Span>, EngineError> {
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.read().await;
        let ty = guard
            .type_by_id(appointment_type_id)
            .ok_or(EngineError::NotFound(appointment_type_id))?;

        calendar::day_slots(
            date,
            &guard.schedule,
            &guard.modifiers,
            ty.duration_ms(),
            now_ms(),
        )
    }

    /// Per-day availability flags over an inclusive date range, for
    /// disabling calendar days in one round trip.
    pub async fn calendar_days(
        &self,
        provider_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, bool)>, EngineError> {
        if from > to {
            return Err(EngineError::InvalidWindow("day range start after end"));
        }
        if (to - from).num_days() >= MAX_CALENDAR_DAYS {
            return Err(EngineError::LimitExceeded("day range too wide"));
        }
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(Vec::new()),
        };
        let guard = ps.read().await;

        let now = now_ms();
        let mut days = Vec::new();
        let mut day = from;
        while day <= to {
            let available =
                calendar::has_availability(day, &guard.schedule, &guard.modifiers, now);
            days.push((day, available));
            day = day.succ_opt().ok_or(EngineError::InvalidWindow(
                "day range beyond calendar bounds",
            ))?;
        }
        Ok(days)
    }

    // ── Listings ─────────────────────────────────────────────────

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.state
            .iter()
            .map(|entry| {
                let ps = entry.value().clone();
                let guard = ps.try_read().expect("list_providers: uncontended read");
                ProviderInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                }
            })
            .collect()
    }

    /// The weekly editor's row set: stored rows plus blank placeholders for
    /// missing weekdays, Sunday first.
    pub async fn schedule_rows(&self, provider_id: Ulid) -> Result<Vec<ScheduleRow>, EngineError> {
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(Vec::new()),
        };
        let guard = ps.read().await;
        Ok(editor_rows(provider_id, &guard.schedule))
    }

    /// Modifiers still relevant at or after `since` (commonly "now" — the
    /// reaper deletes fully past ones on the same boundary).
    pub async fn get_modifiers(
        &self,
        provider_id: Ulid,
        since: Option<Ms>,
    ) -> Result<Vec<ModifierInfo>, EngineError> {
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(Vec::new()),
        };
        let guard = ps.read().await;
        Ok(guard
            .modifiers
            .iter()
            .filter(|m| since.is_none_or(|s| m.span.end >= s))
            .map(|m| ModifierInfo {
                id: m.id,
                provider_id,
                start: m.span.start,
                end: m.span.end,
                exclusive: m.exclusive,
            })
            .collect())
    }

    pub async fn get_types(&self, provider_id: Ulid) -> Result<Vec<AppointmentTypeInfo>, EngineError> {
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(Vec::new()),
        };
        let guard = ps.read().await;
        Ok(guard
            .appointment_types
            .iter()
            .map(|t| AppointmentTypeInfo {
                id: t.id,
                provider_id,
                name: t.name.clone(),
                description: t.description.clone(),
                duration_min: t.duration_min,
                price_cents: t.price_cents,
            })
            .collect())
    }

    pub async fn get_appointments(
        &self,
        provider_id: Ulid,
    ) -> Result<Vec<AppointmentInfo>, EngineError> {
        let ps = match self.get_provider(&provider_id) {
            Some(ps) => ps,
            None => return Ok(Vec::new()),
        };
        let guard = ps.read().await;
        Ok(guard
            .appointments
            .iter()
            .map(|a| AppointmentInfo {
                id: a.id,
                provider_id,
                appointment_type_id: a.appointment_type_id,
                customer_id: a.customer_id,
                start: a.span.start,
                end: a.span.end,
            })
            .collect())
    }
}
