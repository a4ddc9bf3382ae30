use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{BookingEvent, RoomId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking events, one channel per room.
pub struct NotifyHub {
    channels: DashMap<RoomId, broadcast::Sender<BookingEvent>>,
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
        }
    }

    /// Subscribe to events for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, room_id: &str, event: &BookingEvent) {
        if let Some(sender) = self.channels.get(room_id) {
            let _ = sender.send(event.clone());
        }
    }
}
