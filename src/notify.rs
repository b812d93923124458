use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::alerts::Alert;
use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: committed events per vehicle, plus one channel for alerts.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    alerts: broadcast::Sender<Alert>,
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
            alerts: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events for a vehicle. Creates the channel if needed.
    pub fn subscribe(&self, vehicle_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, vehicle_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn send_alert(&self, alert: &Alert) {
        let _ = self.alerts.send(alert.clone());
    }
}
