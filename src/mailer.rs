use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, Ms};

/// Outbound customer notice. Composition and delivery live outside this
/// system; the engine only decides that a notice is owed and hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    Confirmation {
        appointment_id: Ulid,
        provider_id: Ulid,
        customer_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Cancellation {
        appointment_id: Ulid,
        provider_id: Ulid,
        customer_id: Ulid,
        start: Ms,
        end: Ms,
    },
}

impl Notice {
    /// The two event kinds that owe the customer an email.
    pub fn from_event(event: &Event) -> Option<Notice> {
        match event {
            Event::AppointmentBooked {
                id,
                provider_id,
                span,
                customer_id,
                ..
            } => Some(Notice::Confirmation {
                appointment_id: *id,
                provider_id: *provider_id,
                customer_id: *customer_id,
                start: span.start,
                end: span.end,
            }),
            Event::AppointmentCancelled {
                id,
                provider_id,
                customer_id,
                span,
            } => Some(Notice::Cancellation {
                appointment_id: *id,
                provider_id: *provider_id,
                customer_id: *customer_id,
                start: span.start,
                end: span.end,
            }),
            _ => None,
        }
    }
}

/// Fire-and-forget delivery seam. Implementations must not block the
/// caller; failures are their own problem to retry or drop.
pub trait Mailer: Send + Sync {
    fn deliver(&self, notice: &Notice);
}

/// Default mailer: structured log line per notice. A deployment wires a
/// real delivery service here.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn deliver(&self, notice: &Notice) {
        metrics::counter!(crate::observability::NOTICES_TOTAL).increment(1);
        match serde_json::to_string(notice) {
            Ok(json) => tracing::info!(target: "bookwire::mailer", "{json}"),
            Err(e) => tracing::error!("failed to encode notice: {e}"),
        }
    }
}

/// Background task: drain the tenant firehose and deliver a notice for
/// every booked or cancelled appointment.
pub async fn run_mailer(mut events: broadcast::Receiver<Event>, mailer: Arc<dyn Mailer>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(notice) = Notice::from_event(&event) {
                    mailer.deliver(&notice);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("mailer lagged, {n} events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
