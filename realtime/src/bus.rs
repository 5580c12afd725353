//! Shared pub/sub bus between service instances.
//!
//! Two logical channels: `ws:repo` (keyed by repository) and `ws:user`
//! (keyed by user). Every instance publishes to the bus and filters its own
//! local connection sets on receipt; there is no cross-instance membership
//! lookup.
//!
//! `EventBus::Local` is the in-process implementation over a broadcast
//! channel. `BUS_URL` selects the backend at bootstrap; a shared backend
//! (e.g. Redis pub/sub) slots in as a second enum variant with the same
//! envelope.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::messages::ServerMessage;

/// Which logical channel an envelope was published on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum BusChannel {
    /// `ws:repo`: fan out to a repository's subscribers.
    Repo { repository_id: String },
    /// `ws:user`: fan out to one user's connections.
    User { user_id: String },
}

/// One published message with its routing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(flatten)]
    pub channel: BusChannel,
    pub message: ServerMessage,
}

/// Enum-dispatch bus handle.
#[derive(Debug, Clone)]
pub enum EventBus {
    Local(broadcast::Sender<BusEnvelope>),
}

impl EventBus {
    /// In-process bus with a bounded backlog.
    pub fn local(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self::Local(tx)
    }

    /// Publish to `ws:repo`.
    pub fn publish_repo(&self, repository_id: &str, message: ServerMessage) {
        self.publish(BusEnvelope {
            channel: BusChannel::Repo {
                repository_id: repository_id.to_string(),
            },
            message,
        });
    }

    /// Publish to `ws:user`.
    pub fn publish_user(&self, user_id: &str, message: ServerMessage) {
        self.publish(BusEnvelope {
            channel: BusChannel::User {
                user_id: user_id.to_string(),
            },
            message,
        });
    }

    fn publish(&self, envelope: BusEnvelope) {
        match self {
            Self::Local(tx) => {
                // Send fails only when no instance is pumping; that is fine
                // during shutdown.
                if tx.send(envelope).is_err() {
                    warn!("bus publish with no subscribers");
                }
            }
        }
    }

    /// Subscribe this instance's pump to the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEnvelope> {
        match self {
            Self::Local(tx) => tx.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageType;

    #[tokio::test]
    async fn envelopes_route_by_channel() {
        let bus = EventBus::local(32);
        let mut rx = bus.subscribe();

        bus.publish_repo(
            "acme/widgets",
            ServerMessage::new(MessageType::WorkflowUpdate, serde_json::json!({})),
        );
        bus.publish_user(
            "alice",
            ServerMessage::new(MessageType::CommentPosted, serde_json::json!({})),
        );

        let first = rx.recv().await.expect("first");
        assert!(matches!(
            first.channel,
            BusChannel::Repo { ref repository_id } if repository_id == "acme/widgets"
        ));

        let second = rx.recv().await.expect("second");
        assert!(matches!(
            second.channel,
            BusChannel::User { ref user_id } if user_id == "alice"
        ));
    }

    #[tokio::test]
    async fn single_publisher_order_is_preserved() {
        let bus = EventBus::local(64);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish_repo(
                "r",
                ServerMessage::new(MessageType::WorkflowUpdate, serde_json::json!({"seq": i})),
            );
        }
        for i in 0..10 {
            let envelope = rx.recv().await.expect("recv");
            assert_eq!(envelope.message.data["seq"], i);
        }
    }
}
