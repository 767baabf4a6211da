//! Fire-and-forget notifications to connected observers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::component::DeployKind;
use crate::progress::ProgressBoard;
use crate::server::ServerStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    pub total_servers: usize,
    pub active_servers: usize,
    pub total_players: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub id: u32,
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FleetEvent {
    ServerStatus(ServerStatus),
    Stats(FleetStats),
    Roster(Vec<RosterEntry>),
    Progress(ProgressBoard),
    DeployCompleted {
        kind: DeployKind,
        duration_ms: u64,
        errors: Vec<String>,
    },
}

/// Receives serialized events. Delivery is never confirmed.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, event: Arc<[u8]>);
}

/// Serialize `event` and hand it to `sink`.
pub fn publish(sink: &dyn EventSink, event: &FleetEvent) {
    match serde_json::to_vec(event) {
        Ok(bytes) => sink.broadcast(Arc::from(bytes)),
        Err(e) => log::warn!("Failed to serialize fleet event: {}", e),
    }
}

/// In-process fan-out over a broadcast channel.
pub struct EventHub {
    sender: broadcast::Sender<Arc<[u8]>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[u8]>> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(128)
    }
}

impl EventSink for EventHub {
    fn broadcast(&self, event: Arc<[u8]>) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_event_shape() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();

        publish(
            &hub,
            &FleetEvent::Stats(FleetStats {
                total_servers: 2,
                active_servers: 1,
                total_players: 4,
            }),
        );

        let bytes = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "stats");
        assert_eq!(value["data"]["total_players"], 4);
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let hub = EventHub::default();
        publish(&hub, &FleetEvent::Roster(Vec::new()));
    }
}
