use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events: one feed for everything, plus
/// per-appointment feeds created on first subscribe.
pub struct NotifyHub {
    all: broadcast::Sender<Event>,
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Every committed event. The notification dispatcher listens here.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Events touching one appointment. Creates the channel if needed.
    pub fn subscribe(&self, appointment_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(appointment_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let _ = self.all.send(event.clone());
        let Some(id) = event.appointment_id() else {
            return;
        };
        let stale = match self.channels.get(&id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if stale {
            self.channels.remove_if(&id, |_, s| s.receiver_count() == 0);
        }
    }
}
