//! Event fan-out for state changes and outage lifecycle.
//!
//! Push model: subscribers receive `MonitorEvent`s over a broadcast channel
//! so reporting code never polls and the runner never links against it.

use tokio::sync::broadcast;

use crate::model::MonitorEvent;

/// Broadcast bus for monitor events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Events with no live subscribers are dropped.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
