use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::{toggle_at, DEFAULT_TOGGLE_SLOT_MS};
use super::conflict::{check_no_conflict, validate_span};
use super::schedule::validate_rule_times;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_provider(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_PROVIDERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("provider name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ProviderCreated {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(ProviderState::new(id, name))));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn rename_provider(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("provider name too long"));
        }
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ps.write().await;
        let event = Event::ProviderRenamed { id, name };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    pub async fn delete_provider(&self, id: Ulid) -> Result<(), EngineError> {
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;

        // Everything the provider owns goes with it; drop the index entries.
        let guard = ps.read().await;
        let owned: Vec<Ulid> = guard
            .schedule
            .iter()
            .map(|r| r.id)
            .chain(guard.modifiers.iter().map(|m| m.id))
            .chain(guard.appointment_types.iter().map(|t| t.id))
            .chain(guard.appointments.iter().map(|a| a.id))
            .collect();
        drop(guard);

        let event = Event::ProviderDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        for entity_id in owned {
            self.entity_to_provider.remove(&entity_id);
        }
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Weekly schedule ──────────────────────────────────────────

    pub async fn add_rule(
        &self,
        id: Ulid,
        provider_id: Ulid,
        weekday: Weekday,
        start_sec: Option<u32>,
        end_sec: Option<u32>,
    ) -> Result<(), EngineError> {
        validate_rule_times(weekday, start_sec, end_sec)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.entry_count() >= MAX_ENTRIES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many entries on provider"));
        }

        let event = Event::RuleAdded {
            id,
            provider_id,
            weekday,
            start_sec,
            end_sec,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    pub async fn update_rule(
        &self,
        id: Ulid,
        start_sec: Option<u32>,
        end_sec: Option<u32>,
    ) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let weekday = guard
            .schedule
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.weekday)
            .ok_or(EngineError::NotFound(id))?;
        validate_rule_times(weekday, start_sec, end_sec)?;

        let event = Event::RuleUpdated {
            id,
            provider_id,
            start_sec,
            end_sec,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await?;
        Ok(provider_id)
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::RuleRemoved { id, provider_id };
        self.persist_and_apply(provider_id, &mut guard, &event).await?;
        Ok(provider_id)
    }

    // ── Modifiers ────────────────────────────────────────────────

    pub async fn add_modifier(
        &self,
        id: Ulid,
        provider_id: Ulid,
        span: Span,
        exclusive: bool,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.entry_count() >= MAX_ENTRIES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many entries on provider"));
        }

        let event = Event::ModifierAdded {
            id,
            provider_id,
            span,
            exclusive,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    pub async fn remove_modifier(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::ModifierRemoved { id, provider_id };
        self.persist_and_apply(provider_id, &mut guard, &event).await?;
        Ok(provider_id)
    }

    /// Commit a calendar click. The classify-then-decide step and the
    /// resulting deletes/create run under one provider write lock, so two
    /// concurrent clicks at the same instant serialize instead of creating
    /// duplicate modifiers.
    pub async fn toggle_modifier(
        &self,
        provider_id: Ulid,
        at: Ms,
        slot_ms: Option<Ms>,
    ) -> Result<ToggleOutcome, EngineError> {
        let slot_ms = slot_ms.unwrap_or(DEFAULT_TOGGLE_SLOT_MS);
        if slot_ms <= 0 {
            return Err(EngineError::InvalidDuration(slot_ms));
        }
        let probe = Span::new(at, at + slot_ms);
        validate_span(&probe)?;

        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;

        let plan = toggle_at(at, slot_ms, &guard.schedule, &guard.modifiers);

        let mut outcome = ToggleOutcome {
            deleted: Vec::new(),
            created: None,
        };
        for id in plan.delete {
            let event = Event::ModifierRemoved { id, provider_id };
            self.persist_and_apply(provider_id, &mut guard, &event).await?;
            outcome.deleted.push(id);
        }
        if let Some(new_modifier) = plan.create {
            if guard.entry_count() >= MAX_ENTRIES_PER_PROVIDER {
                return Err(EngineError::LimitExceeded("too many entries on provider"));
            }
            let id = Ulid::new();
            let event = Event::ModifierAdded {
                id,
                provider_id,
                span: new_modifier.span,
                exclusive: new_modifier.exclusive,
            };
            self.persist_and_apply(provider_id, &mut guard, &event).await?;
            outcome.created = Some(ModifierInfo {
                id,
                provider_id,
                start: new_modifier.span.start,
                end: new_modifier.span.end,
                exclusive: new_modifier.exclusive,
            });
        }
        Ok(outcome)
    }

    // ── Appointment types ────────────────────────────────────────

    pub async fn add_type(
        &self,
        id: Ulid,
        provider_id: Ulid,
        name: String,
        description: Option<String>,
        duration_min: u32,
        price_cents: Option<i64>,
    ) -> Result<(), EngineError> {
        if duration_min == 0 {
            return Err(EngineError::InvalidDuration(0));
        }
        if duration_min > MAX_DURATION_MIN {
            return Err(EngineError::LimitExceeded("appointment type too long"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("type name too long"));
        }
        if let Some(ref d) = description
            && d.len() > MAX_DESCRIPTION_LEN
        {
            return Err(EngineError::LimitExceeded("type description too long"));
        }
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.entry_count() >= MAX_ENTRIES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many entries on provider"));
        }

        let event = Event::TypeAdded {
            id,
            provider_id,
            name,
            description,
            duration_min,
            price_cents,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    pub async fn remove_type(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let event = Event::TypeRemoved { id, provider_id };
        self.persist_and_apply(provider_id, &mut guard, &event).await?;
        Ok(provider_id)
    }

    // ── Appointments ─────────────────────────────────────────────

    /// Insert-if-free: the conflict check and the insert run under one
    /// provider write lock, so a slot can only be consumed once. The span
    /// must also match the appointment type's duration exactly.
    pub async fn book_appointment(
        &self,
        id: Ulid,
        provider_id: Ulid,
        appointment_type_id: Ulid,
        customer_id: Ulid,
        span: Span,
    ) -> Result<(), EngineError> {
        validate_span(&span)?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let mut guard = ps.write().await;
        if guard.entry_count() >= MAX_ENTRIES_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many entries on provider"));
        }

        let ty = guard
            .type_by_id(appointment_type_id)
            .ok_or(EngineError::NotFound(appointment_type_id))?;
        if span.duration_ms() != ty.duration_ms() {
            return Err(EngineError::WrongDuration {
                expected_min: ty.duration_min,
                got_ms: span.duration_ms(),
            });
        }

        check_no_conflict(&guard, &span)?;

        let event = Event::AppointmentBooked {
            id,
            provider_id,
            span,
            appointment_type_id,
            customer_id,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (provider_id, mut guard) = self.resolve_entity_write(&id).await?;
        let appointment = guard
            .appointments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::AppointmentCancelled {
            id,
            provider_id,
            customer_id: appointment.customer_id,
            span: appointment.span,
        };
        self.persist_and_apply(provider_id, &mut guard, &event).await?;
        Ok(provider_id)
    }

    // ── Maintenance ──────────────────────────────────────────────

    /// Modifiers whose span is entirely in the past. Past days always
    /// resolve empty, so reaping them never changes an observable result.
    pub fn collect_stale_modifiers(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut stale = Vec::new();
        for entry in self.state.iter() {
            let ps = entry.value().clone();
            if let Ok(guard) = ps.try_read() {
                for modifier in &guard.modifiers {
                    if modifier.span.end <= now {
                        stale.push((modifier.id, guard.id));
                    }
                }
            }
        }
        stale
    }

    /// Rewrite the WAL as the minimal event set recreating current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for entry in self.state.iter() {
            let ps = entry.value().clone();
            let guard = ps.try_read().expect("compact: uncontended read");

            events.push(Event::ProviderCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for rule in &guard.schedule {
                events.push(Event::RuleAdded {
                    id: rule.id,
                    provider_id: guard.id,
                    weekday: rule.weekday,
                    start_sec: rule.start_sec,
                    end_sec: rule.end_sec,
                });
            }
            for modifier in &guard.modifiers {
                events.push(Event::ModifierAdded {
                    id: modifier.id,
                    provider_id: guard.id,
                    span: modifier.span,
                    exclusive: modifier.exclusive,
                });
            }
            for ty in &guard.appointment_types {
                events.push(Event::TypeAdded {
                    id: ty.id,
                    provider_id: guard.id,
                    name: ty.name.clone(),
                    description: ty.description.clone(),
                    duration_min: ty.duration_min,
                    price_cents: ty.price_cents,
                });
            }
            for appointment in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: appointment.id,
                    provider_id: guard.id,
                    span: appointment.span,
                    appointment_type_id: appointment.appointment_type_id,
                    customer_id: appointment.customer_id,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
