//! Wire messages for the realtime transport.
//!
//! Client frames decode strictly (unknown types are rejected with an error
//! frame). Server frames share one envelope: `{type, workflowId?, data,
//! timestamp}`.

use serde::{Deserialize, Serialize};

/// Presence status of a user on a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Viewing,
    Reviewing,
    Commenting,
    Idle,
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    Subscribe {
        #[serde(rename = "repositoryIds")]
        repository_ids: Vec<String>,
    },
    JoinReview {
        #[serde(rename = "repositoryId")]
        repository_id: String,
        #[serde(rename = "prNumber")]
        pr_number: i64,
    },
    CursorMove {
        file: String,
        line: u32,
        column: u32,
    },
    NavigateTo {
        file: String,
        line: Option<u32>,
    },
    UpdateStatus {
        status: PresenceStatus,
    },
    StartSession {
        #[serde(rename = "repositoryId")]
        repository_id: String,
        #[serde(rename = "prNumber")]
        pr_number: i64,
        #[serde(rename = "syncNavigation", default)]
        sync_navigation: bool,
    },
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    ToggleSync {
        enabled: bool,
    },
    Ping,
}

/// Server → client frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Connected,
    Authenticated,
    Subscribed,
    Unsubscribed,
    ReviewJoined,
    SessionStarted,
    SessionJoined,
    WorkflowUpdate,
    CommentPosted,
    TestGenerated,
    AnalysisComplete,
    PresenceUpdate,
    CursorMove,
    NavigationSync,
    ReviewSessionUpdate,
    Error,
    Pong,
}

/// The single server → client envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "workflowId", skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub data: serde_json::Value,
    /// UTC epoch milliseconds.
    pub timestamp: i64,
}

impl ServerMessage {
    pub fn new(kind: MessageType, data: serde_json::Value) -> Self {
        Self {
            kind,
            workflow_id: None,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn for_workflow(
        kind: MessageType,
        workflow_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            workflow_id: Some(workflow_id.into()),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            MessageType::Error,
            serde_json::json!({"message": message.into()}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_decode_by_type_tag() {
        let frame: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","repositoryIds":["acme/widgets"]}"#)
                .expect("decode");
        assert!(matches!(
            frame,
            ClientMessage::Subscribe { repository_ids } if repository_ids == vec!["acme/widgets"]
        ));

        let frame: ClientMessage =
            serde_json::from_str(r#"{"type":"cursor_move","file":"src/a.rs","line":3,"column":9}"#)
                .expect("decode");
        assert!(matches!(frame, ClientMessage::CursorMove { line: 3, .. }));
    }

    #[test]
    fn unknown_client_type_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"drop_tables"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_envelope_keeps_wire_names() {
        let msg = ServerMessage::for_workflow(
            MessageType::WorkflowUpdate,
            "w1",
            serde_json::json!({"status": "RUNNING"}),
        );
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "workflow_update");
        assert_eq!(json["workflowId"], "w1");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
