//! WebSocket transport for the realtime fan-out layer.
//!
//! The socket is a dumb pipe: frames decode into [`ClientMessage`]s and go
//! to the hub; hub frames come back over a bounded mpsc channel. The only
//! transport-level concern handled here is authentication: session tokens
//! are `user_id.hex(hmac_sha256(user_id, SESSION_SECRET))` and must arrive
//! in an `authenticate` frame before anything else works.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::debug;

use realtime::{ClientMessage, ServerMessage, CONNECTION_BUFFER};

use crate::core::app_state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// `GET /api/ws`: upgrade and hand the socket to the hub.
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_BUFFER);
    let conn_id = state.hub.register(tx.clone());

    // Writer: hub frames → socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: socket frames → hub.
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        match frame {
            Message::Text(text) => {
                let message: ClientMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "unparseable client frame");
                        let _ = tx.try_send(ServerMessage::error("unrecognized message"));
                        continue;
                    }
                };
                match message {
                    ClientMessage::Authenticate { token } => {
                        match verify_session_token(&state.config.session_secret, &token) {
                            Some(user_id) => state.hub.authenticate(conn_id, &user_id),
                            None => {
                                let _ = tx.try_send(ServerMessage::error("invalid token"));
                            }
                        }
                    }
                    other => state.hub.handle(conn_id, other),
                }
            }
            Message::Close(_) => break,
            // Transport pings are answered by axum automatically.
            _ => {}
        }
    }

    state.hub.disconnect(conn_id);
    writer.abort();
    debug!(conn_id, "socket closed");
}

/// Validate a session token and return its user id.
pub fn verify_session_token(secret: &str, token: &str) -> Option<String> {
    let (user_id, signature_hex) = token.rsplit_once('.')?;
    if user_id.is_empty() {
        return None;
    }
    let signature = hex::decode(signature_hex).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(user_id.as_bytes());
    mac.verify_slice(&signature).ok()?;
    Some(user_id.to_string())
}

/// Mint a session token (login flows and tests).
pub fn issue_session_token(secret: &str, user_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(user_id.as_bytes());
    format!("{user_id}.{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = issue_session_token("secret", "alice");
        assert_eq!(
            verify_session_token("secret", &token).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn tampered_tokens_reject() {
        let token = issue_session_token("secret", "alice");
        assert!(verify_session_token("other-secret", &token).is_none());

        let forged = token.replace("alice", "admin");
        assert!(verify_session_token("secret", &forged).is_none());

        assert!(verify_session_token("secret", "no-dot-here").is_none());
        assert!(verify_session_token("secret", ".abcdef").is_none());
    }
}
