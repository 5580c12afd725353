//! Realtime fan-out layer.
//!
//! Multiplexes workflow events across horizontally scaled instances through
//! a shared [`bus::EventBus`], tracks per-PR presence, and coordinates
//! synchronized co-review sessions. All state here is ephemeral; nothing is
//! persisted.
//!
//! Wiring (done by the API bootstrap):
//! 1. construct one [`Hub`] per instance over the shared bus;
//! 2. spawn [`spawn_bus_pump`] so bus traffic reaches local connections;
//! 3. spawn [`spawn_heartbeat`] for the 30 s ping/terminate cycle.

pub mod bus;
pub mod hub;
pub mod messages;
pub mod presence;

pub use bus::{BusChannel, BusEnvelope, EventBus};
pub use hub::{ConnId, Hub, CONNECTION_BUFFER};
pub use messages::{ClientMessage, MessageType, PresenceStatus, ServerMessage};
pub use presence::{repo_key, Presence, ReviewSession};

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Heartbeat interval; two missed replies terminate a connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Pump bus envelopes into the local hub until the bus closes.
pub fn spawn_bus_pump(hub: Arc<Hub>) -> tokio::task::JoinHandle<()> {
    let mut rx = hub.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => hub.deliver(&envelope),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(count)) => {
                    warn!(count, "bus pump lagged, envelopes dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Periodic heartbeat sweep.
pub fn spawn_heartbeat(hub: Arc<Hub>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let dropped = hub.sweep();
            if !dropped.is_empty() {
                warn!(count = dropped.len(), "heartbeat terminated connections");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn bus_pump_delivers_to_local_subscribers() {
        let bus = EventBus::local(64);
        let hub = Arc::new(Hub::new(bus.clone()));
        let _pump = spawn_bus_pump(hub.clone());

        let (tx, mut rx) = mpsc::channel(CONNECTION_BUFFER);
        let conn = hub.register(tx);
        hub.authenticate(conn, "alice");
        hub.handle(
            conn,
            ClientMessage::Subscribe {
                repository_ids: vec!["acme/widgets".to_string()],
            },
        );
        // Drain the connected/authenticated/subscribed frames.
        while rx.try_recv().is_ok() {}

        bus.publish_repo(
            "acme/widgets",
            ServerMessage::for_workflow(MessageType::WorkflowUpdate, "w1", json!({})),
        );

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timely")
            .expect("frame");
        assert_eq!(frame.kind, MessageType::WorkflowUpdate);
        assert_eq!(frame.workflow_id.as_deref(), Some("w1"));
    }
}
