mod availability;
mod calendar;
mod classify;
mod conflict;
mod error;
mod mutations;
mod queries;
mod schedule;
mod slot;
#[cfg(test)]
mod tests;

pub use availability::resolve_day;
pub use calendar::{
    day_slots, has_availability, toggle_at, NewModifier, TogglePlan, DEFAULT_TOGGLE_SLOT_MS,
};
pub use classify::{bucketize, classify, IntervalRelation, RelationBuckets};
pub use error::EngineError;
pub use schedule::{
    day_windows, editor_rows, in_business_hours, missing_weekdays, validate_rule_times,
};
pub use slot::{chunk, chunk_all};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends are batched: the first append
/// blocks, everything already queued behind it joins the same batch, and a
/// single fsync commits them all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit the in-flight batch before touching the WAL
                    // file for compaction or counters.
                    deferred = Some(other);
                    break;
                }
            }
        }

        let result = flush_batch(&mut wal, &batch);
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────────────

pub struct Engine {
    pub state: DashMap<Ulid, SharedProviderState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (rule/modifier/type/appointment) id → provider id.
    pub(super) entity_to_provider: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a ProviderState (no locking — caller holds
/// the lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RuleAdded {
            id,
            provider_id,
            weekday,
            start_sec,
            end_sec,
        } => {
            ps.insert_rule(RecurringRule {
                id: *id,
                weekday: *weekday,
                start_sec: *start_sec,
                end_sec: *end_sec,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::RuleUpdated {
            id,
            start_sec,
            end_sec,
            ..
        } => {
            if let Some(rule) = ps.rule_mut(*id) {
                rule.start_sec = *start_sec;
                rule.end_sec = *end_sec;
            }
        }
        Event::RuleRemoved { id, .. } => {
            ps.remove_rule(*id);
            entity_map.remove(id);
        }
        Event::ModifierAdded {
            id,
            provider_id,
            span,
            exclusive,
        } => {
            ps.insert_modifier(Modifier {
                id: *id,
                span: *span,
                exclusive: *exclusive,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::ModifierRemoved { id, .. } => {
            ps.remove_modifier(*id);
            entity_map.remove(id);
        }
        Event::TypeAdded {
            id,
            provider_id,
            name,
            description,
            duration_min,
            price_cents,
        } => {
            ps.insert_type(AppointmentType {
                id: *id,
                name: name.clone(),
                description: description.clone(),
                duration_min: *duration_min,
                price_cents: *price_cents,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::TypeRemoved { id, .. } => {
            ps.remove_type(*id);
            entity_map.remove(id);
        }
        Event::AppointmentBooked {
            id,
            provider_id,
            span,
            appointment_type_id,
            customer_id,
        } => {
            ps.insert_appointment(Appointment {
                id: *id,
                span: *span,
                appointment_type_id: *appointment_type_id,
                customer_id: *customer_id,
            });
            entity_map.insert(*id, *provider_id);
        }
        Event::AppointmentCancelled { id, .. } => {
            ps.remove_appointment(*id);
            entity_map.remove(id);
        }
        Event::ProviderRenamed { name, .. } => {
            ps.name = name.clone();
        }
        // Created/Deleted are handled at the DashMap level, not here.
        Event::ProviderCreated { .. } | Event::ProviderDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_provider: DashMap::new(),
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never block here: this may run inside an
        // async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::ProviderCreated { id, name } => {
                    let ps = ProviderState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(ps)));
                }
                Event::ProviderDeleted { id } => {
                    engine.state.remove(id);
                }
                other => {
                    if let Some(provider_id) = event_provider_id(other)
                        && let Some(entry) = engine.state.get(&provider_id)
                    {
                        let ps_arc = entry.clone();
                        let mut guard = ps_arc.try_write().expect("replay: uncontended write");
                        apply_to_provider(&mut guard, other, &engine.entity_to_provider);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_provider_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_provider.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        provider_id: Ulid,
        ps: &mut ProviderState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_provider(ps, event, &self.entity_to_provider);
        self.notify.send(provider_id, event);
        Ok(())
    }

    /// Lookup entity → provider, get provider, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProviderState>), EngineError> {
        let provider_id = self
            .get_provider_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .get_provider(&provider_id)
            .ok_or(EngineError::NotFound(provider_id))?;
        let guard = ps.write_owned().await;
        Ok((provider_id, guard))
    }
}

/// Extract the provider id from an event (for non-Create/Delete events).
fn event_provider_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RuleAdded { provider_id, .. }
        | Event::RuleUpdated { provider_id, .. }
        | Event::RuleRemoved { provider_id, .. }
        | Event::ModifierAdded { provider_id, .. }
        | Event::ModifierRemoved { provider_id, .. }
        | Event::TypeAdded { provider_id, .. }
        | Event::TypeRemoved { provider_id, .. }
        | Event::AppointmentBooked { provider_id, .. }
        | Event::AppointmentCancelled { provider_id, .. } => Some(*provider_id),
        Event::ProviderRenamed { id, .. } => Some(*id),
        Event::ProviderCreated { .. } | Event::ProviderDeleted { .. } => None,
    }
}
