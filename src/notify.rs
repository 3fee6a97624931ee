use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events. Interested parties subscribe per
/// provider (calendar views watching one schedule) or to the tenant-wide
/// firehose (the mailer). Sending never blocks and drops silently when
/// nobody listens.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    firehose: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one provider's events. Creates the channel if needed.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every event of this tenant.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.firehose.subscribe()
    }

    pub fn send(&self, provider_id: Ulid, event: &Event) {
        let _ = self.firehose.send(event.clone());
        if let Some(sender) = self.channels.get(&provider_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a provider's channel (e.g. when the provider is deleted).
    pub fn remove(&self, provider_id: &Ulid) {
        self.channels.remove(provider_id);
    }
}
