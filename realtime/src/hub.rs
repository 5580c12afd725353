//! Per-instance fan-out hub.
//!
//! Tracks this instance's connections and their memberships:
//! `subscribers(repo)`, `userConnections(user)`, and `prReview(repoKey)`.
//! Cross-instance traffic flows through the [`EventBus`]; on delivery each
//! instance filters its own local sets.
//!
//! Invariants enforced here:
//! - a connection is authenticated before any subscribe/join operation;
//! - only the session host may toggle sync or broadcast navigation;
//! - `cursor_move` is dropped unless the sender joined the PR's review;
//! - two missed heartbeat replies terminate a connection.
//!
//! Delivery uses `try_send`; a slow consumer loses frames rather than
//! stalling the hub (clients reconcile via the REST summary endpoint).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{BusChannel, BusEnvelope, EventBus};
use crate::messages::{ClientMessage, MessageType, PresenceStatus, ServerMessage};
use crate::presence::{repo_key, Presence, ReviewSession};

/// Hub-assigned connection id.
pub type ConnId = u64;

/// Frames queued per connection before a slow consumer starts losing them.
pub const CONNECTION_BUFFER: usize = 256;

#[derive(Debug)]
struct Connection {
    tx: mpsc::Sender<ServerMessage>,
    user_id: Option<String>,
    subscribed_repos: HashSet<String>,
    joined_reviews: HashSet<String>,
    /// Most recently joined review; cursor updates apply here.
    current_review: Option<String>,
    session_id: Option<String>,
    missed_pings: u8,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: ConnId,
    connections: HashMap<ConnId, Connection>,
    repo_subscribers: HashMap<String, HashSet<ConnId>>,
    user_connections: HashMap<String, HashSet<ConnId>>,
    pr_review: HashMap<String, HashSet<ConnId>>,
    presence: HashMap<(String, String), Presence>,
    sessions: HashMap<String, ReviewSession>,
}

/// Per-instance hub over the shared bus.
pub struct Hub {
    state: Mutex<HubState>,
    bus: EventBus,
}

impl Hub {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a new (unauthenticated) connection.
    pub fn register(&self, tx: mpsc::Sender<ServerMessage>) -> ConnId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        send(&tx, ServerMessage::new(MessageType::Connected, json!({"connectionId": id})));
        state.connections.insert(
            id,
            Connection {
                tx,
                user_id: None,
                subscribed_repos: HashSet::new(),
                joined_reviews: HashSet::new(),
                current_review: None,
                session_id: None,
                missed_pings: 0,
            },
        );
        debug!(conn_id = id, "connection registered");
        id
    }

    /// Attach an authenticated identity (the transport validated the token).
    pub fn authenticate(&self, conn_id: ConnId, user_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(conn) = state.connections.get_mut(&conn_id) {
            conn.user_id = Some(user_id.to_string());
            let tx = conn.tx.clone();
            state
                .user_connections
                .entry(user_id.to_string())
                .or_default()
                .insert(conn_id);
            send(
                &tx,
                ServerMessage::new(MessageType::Authenticated, json!({"userId": user_id})),
            );
        }
    }

    /// Handle one already-decoded client frame.
    ///
    /// `Authenticate` never reaches here; the transport resolves tokens and
    /// calls [`Hub::authenticate`].
    pub fn handle(&self, conn_id: ConnId, message: ClientMessage) {
        match message {
            ClientMessage::Authenticate { .. } => {
                self.send_to(conn_id, ServerMessage::error("already authenticated"));
            }
            ClientMessage::Ping => {
                let mut state = self.state.lock().unwrap();
                if let Some(conn) = state.connections.get_mut(&conn_id) {
                    conn.missed_pings = 0;
                    send(&conn.tx, ServerMessage::new(MessageType::Pong, json!({})));
                }
            }
            ClientMessage::Subscribe { repository_ids } => {
                self.subscribe(conn_id, repository_ids)
            }
            ClientMessage::JoinReview {
                repository_id,
                pr_number,
            } => self.join_review(conn_id, &repository_id, pr_number),
            ClientMessage::CursorMove { file, line, column } => {
                self.cursor_move(conn_id, &file, line, column)
            }
            ClientMessage::NavigateTo { file, line } => self.navigate_to(conn_id, &file, line),
            ClientMessage::UpdateStatus { status } => self.update_status(conn_id, status),
            ClientMessage::StartSession {
                repository_id,
                pr_number,
                sync_navigation,
            } => self.start_session(conn_id, &repository_id, pr_number, sync_navigation),
            ClientMessage::JoinSession { session_id } => self.join_session(conn_id, &session_id),
            ClientMessage::ToggleSync { enabled } => self.toggle_sync(conn_id, enabled),
        }
    }

    fn subscribe(&self, conn_id: ConnId, repository_ids: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return;
        };
        if conn.user_id.is_none() {
            let tx = conn.tx.clone();
            send(&tx, ServerMessage::error("authenticate first"));
            return;
        }
        let tx = conn.tx.clone();
        for repo in &repository_ids {
            conn.subscribed_repos.insert(repo.clone());
        }
        for repo in &repository_ids {
            state
                .repo_subscribers
                .entry(repo.clone())
                .or_default()
                .insert(conn_id);
        }
        send(
            &tx,
            ServerMessage::new(
                MessageType::Subscribed,
                json!({"repositoryIds": repository_ids}),
            ),
        );
    }

    fn join_review(&self, conn_id: ConnId, repository_id: &str, pr_number: i64) {
        let key = repo_key(repository_id, pr_number);
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return;
        };
        let Some(user_id) = conn.user_id.clone() else {
            let tx = conn.tx.clone();
            send(&tx, ServerMessage::error("authenticate first"));
            return;
        };
        conn.joined_reviews.insert(key.clone());
        conn.current_review = Some(key.clone());
        let tx = conn.tx.clone();

        state.pr_review.entry(key.clone()).or_default().insert(conn_id);
        state
            .presence
            .entry((key.clone(), user_id.clone()))
            .or_insert_with(|| Presence::new(repository_id, pr_number, &user_id))
            .touch();

        let roster: Vec<&Presence> = state
            .presence
            .iter()
            .filter(|((k, _), _)| *k == key)
            .map(|(_, p)| p)
            .collect();
        send(
            &tx,
            ServerMessage::new(
                MessageType::ReviewJoined,
                json!({"repositoryId": repository_id, "prNumber": pr_number, "presence": roster}),
            ),
        );
        drop(tx);

        let update = ServerMessage::new(
            MessageType::PresenceUpdate,
            json!({"repositoryId": repository_id, "prNumber": pr_number, "userId": user_id, "status": "VIEWING"}),
        );
        broadcast_to_room(&state, &key, Some(conn_id), update);
    }

    fn cursor_move(&self, conn_id: ConnId, file: &str, line: u32, column: u32) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get(&conn_id) else {
            return;
        };
        // Dropped unless the sender joined this PR's review.
        let Some(key) = conn.current_review.clone() else {
            debug!(conn_id, "cursor_move dropped: not in a review");
            return;
        };
        let Some(user_id) = conn.user_id.clone() else {
            return;
        };

        if let Some(presence) = state.presence.get_mut(&(key.clone(), user_id.clone())) {
            presence.current_file = Some(file.to_string());
            presence.current_line = Some(line);
            presence.touch();
        }

        let update = ServerMessage::new(
            MessageType::CursorMove,
            json!({"userId": user_id, "file": file, "line": line, "column": column}),
        );
        broadcast_to_room(&state, &key, Some(conn_id), update);
    }

    fn navigate_to(&self, conn_id: ConnId, file: &str, line: Option<u32>) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get(&conn_id) else {
            return;
        };
        let (Some(user_id), Some(session_id)) = (conn.user_id.clone(), conn.session_id.clone())
        else {
            return;
        };
        let tx = conn.tx.clone();

        let Some(session) = state.sessions.get_mut(&session_id) else {
            return;
        };
        // Only the host broadcasts navigation.
        if session.host_user_id != user_id {
            send(&tx, ServerMessage::error("only the session host may navigate"));
            return;
        }
        if !session.sync_navigation {
            return;
        }
        session.current_file = Some(file.to_string());
        session.current_line = line;
        session.touch();
        let key = repo_key(&session.repository_id, session.pr_number);

        let update = ServerMessage::new(
            MessageType::NavigationSync,
            json!({"sessionId": session_id, "file": file, "line": line}),
        );
        broadcast_to_room(&state, &key, Some(conn_id), update);
    }

    fn update_status(&self, conn_id: ConnId, status: PresenceStatus) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get(&conn_id) else {
            return;
        };
        let (Some(user_id), Some(key)) = (conn.user_id.clone(), conn.current_review.clone())
        else {
            return;
        };
        if let Some(presence) = state.presence.get_mut(&(key.clone(), user_id.clone())) {
            presence.status = status;
            presence.touch();
        }
        let update = ServerMessage::new(
            MessageType::PresenceUpdate,
            json!({"userId": user_id, "status": status}),
        );
        broadcast_to_room(&state, &key, Some(conn_id), update);
    }

    fn start_session(
        &self,
        conn_id: ConnId,
        repository_id: &str,
        pr_number: i64,
        sync_navigation: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return;
        };
        let Some(user_id) = conn.user_id.clone() else {
            let tx = conn.tx.clone();
            send(&tx, ServerMessage::error("authenticate first"));
            return;
        };
        let session = ReviewSession::new(repository_id, pr_number, &user_id, sync_navigation);
        conn.session_id = Some(session.id.clone());
        let tx = conn.tx.clone();

        send(
            &tx,
            ServerMessage::new(MessageType::SessionStarted, json!({"session": session})),
        );
        info!(session_id = %session.id, host = %user_id, "review session started");
        state.sessions.insert(session.id.clone(), session);
    }

    fn join_session(&self, conn_id: ConnId, session_id: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return;
        };
        let Some(user_id) = conn.user_id.clone() else {
            let tx = conn.tx.clone();
            send(&tx, ServerMessage::error("authenticate first"));
            return;
        };
        let tx = conn.tx.clone();
        conn.session_id = Some(session_id.to_string());

        let Some(session) = state.sessions.get_mut(session_id) else {
            send(&tx, ServerMessage::error("unknown session"));
            return;
        };
        if !session.participants.contains(&user_id) {
            session.participants.push(user_id.clone());
        }
        session.touch();
        let session_snapshot = session.clone();
        let key = repo_key(&session_snapshot.repository_id, session_snapshot.pr_number);

        send(
            &tx,
            ServerMessage::new(
                MessageType::SessionJoined,
                json!({"session": session_snapshot}),
            ),
        );
        let update = ServerMessage::new(
            MessageType::ReviewSessionUpdate,
            json!({"session": session_snapshot, "joined": user_id}),
        );
        broadcast_to_room(&state, &key, Some(conn_id), update);
    }

    fn toggle_sync(&self, conn_id: ConnId, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.get(&conn_id) else {
            return;
        };
        let (Some(user_id), Some(session_id)) = (conn.user_id.clone(), conn.session_id.clone())
        else {
            return;
        };
        let tx = conn.tx.clone();
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return;
        };
        // Host-only control.
        if session.host_user_id != user_id {
            send(&tx, ServerMessage::error("only the session host may toggle sync"));
            return;
        }
        session.sync_navigation = enabled;
        session.touch();
        let session_snapshot = session.clone();
        let key = repo_key(&session_snapshot.repository_id, session_snapshot.pr_number);

        let update = ServerMessage::new(
            MessageType::ReviewSessionUpdate,
            json!({"session": session_snapshot}),
        );
        broadcast_to_room(&state, &key, None, update);
    }

    /// Remove a connection and everything it anchored.
    pub fn disconnect(&self, conn_id: ConnId) {
        let mut state = self.state.lock().unwrap();
        let Some(conn) = state.connections.remove(&conn_id) else {
            return;
        };

        for repo in &conn.subscribed_repos {
            if let Some(set) = state.repo_subscribers.get_mut(repo) {
                set.remove(&conn_id);
                if set.is_empty() {
                    state.repo_subscribers.remove(repo);
                }
            }
        }
        if let Some(user_id) = &conn.user_id {
            let user_gone = if let Some(set) = state.user_connections.get_mut(user_id) {
                set.remove(&conn_id);
                set.is_empty()
            } else {
                false
            };
            if user_gone {
                state.user_connections.remove(user_id);
            }

            for key in &conn.joined_reviews {
                if let Some(room) = state.pr_review.get_mut(key) {
                    room.remove(&conn_id);
                    if room.is_empty() {
                        state.pr_review.remove(key);
                    }
                }
                // Presence lives only while some connection of the user is
                // in the room.
                let user_still_here = state
                    .pr_review
                    .get(key)
                    .map(|room| {
                        room.iter().any(|id| {
                            state
                                .connections
                                .get(id)
                                .and_then(|c| c.user_id.as_deref())
                                == Some(user_id.as_str())
                        })
                    })
                    .unwrap_or(false);
                if !user_still_here {
                    state.presence.remove(&(key.clone(), user_id.clone()));
                }
            }

            if let Some(session_id) = &conn.session_id {
                if let Some(session) = state.sessions.get_mut(session_id) {
                    session.remove_participant(user_id);
                }
            }
        }

        // Reap sessions whose last participant left.
        let now = chrono::Utc::now().timestamp_millis();
        state.sessions.retain(|_, s| !s.is_stale(now));
        debug!(conn_id, "connection removed");
    }

    /// Deliver a bus envelope to this instance's matching connections.
    pub fn deliver(&self, envelope: &BusEnvelope) {
        let state = self.state.lock().unwrap();
        let targets: Vec<mpsc::Sender<ServerMessage>> = match &envelope.channel {
            BusChannel::Repo { repository_id } => state
                .repo_subscribers
                .get(repository_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.connections.get(id).map(|c| c.tx.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            BusChannel::User { user_id } => state
                .user_connections
                .get(user_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.connections.get(id).map(|c| c.tx.clone()))
                        .collect()
                })
                .unwrap_or_default(),
        };
        drop(state);

        for tx in targets {
            send(&tx, envelope.message.clone());
        }
    }

    /// Heartbeat sweep: every connection accrues a missed ping; two misses
    /// terminate. Returns the terminated ids so the transport can close the
    /// underlying sockets.
    pub fn sweep(&self) -> Vec<ConnId> {
        let to_drop: Vec<ConnId> = {
            let mut state = self.state.lock().unwrap();
            let mut drop_list = Vec::new();
            for (id, conn) in state.connections.iter_mut() {
                conn.missed_pings += 1;
                if conn.missed_pings > 2 {
                    drop_list.push(*id);
                }
            }
            drop_list
        };
        for id in &to_drop {
            warn!(conn_id = id, "connection missed two heartbeats, terminating");
            self.disconnect(*id);
        }

        // GC stale presence/sessions while we are here.
        let now = chrono::Utc::now().timestamp_millis();
        let mut state = self.state.lock().unwrap();
        state.presence.retain(|_, p| !p.is_stale(now));
        state.sessions.retain(|_, s| !s.is_stale(now));
        to_drop
    }

    /// Counts for the health endpoint.
    pub fn stats(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (
            state.connections.len(),
            state.presence.len(),
            state.sessions.len(),
        )
    }

    fn send_to(&self, conn_id: ConnId, message: ServerMessage) {
        let state = self.state.lock().unwrap();
        if let Some(conn) = state.connections.get(&conn_id) {
            send(&conn.tx, message);
        }
    }
}

fn send(tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if tx.try_send(message).is_err() {
        // Slow consumer or closing socket; the client catches up over REST.
        debug!("dropped frame for slow consumer");
    }
}

fn broadcast_to_room(
    state: &HubState,
    key: &str,
    skip: Option<ConnId>,
    message: ServerMessage,
) {
    if let Some(room) = state.pr_review.get(key) {
        for id in room {
            if Some(*id) == skip {
                continue;
            }
            if let Some(conn) = state.connections.get(id) {
                send(&conn.tx, message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Hub {
        Hub::new(EventBus::local(64))
    }

    fn connect(hub: &Hub) -> (ConnId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let id = hub.register(tx);
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn subscribe_requires_authentication() {
        let hub = hub();
        let (conn, mut rx) = connect(&hub);

        hub.handle(
            conn,
            ClientMessage::Subscribe {
                repository_ids: vec!["acme/widgets".to_string()],
            },
        );
        let frames = drain(&mut rx);
        assert!(frames
            .iter()
            .any(|f| f.kind == MessageType::Error));

        hub.authenticate(conn, "alice");
        hub.handle(
            conn,
            ClientMessage::Subscribe {
                repository_ids: vec!["acme/widgets".to_string()],
            },
        );
        let frames = drain(&mut rx);
        assert!(frames.iter().any(|f| f.kind == MessageType::Subscribed));
    }

    #[tokio::test]
    async fn repo_events_reach_only_subscribers() {
        let hub = hub();
        let (sub, mut sub_rx) = connect(&hub);
        let (other, mut other_rx) = connect(&hub);
        hub.authenticate(sub, "alice");
        hub.authenticate(other, "bob");
        hub.handle(
            sub,
            ClientMessage::Subscribe {
                repository_ids: vec!["acme/widgets".to_string()],
            },
        );
        drain(&mut sub_rx);
        drain(&mut other_rx);

        let envelope = BusEnvelope {
            channel: BusChannel::Repo {
                repository_id: "acme/widgets".to_string(),
            },
            message: ServerMessage::for_workflow(
                MessageType::WorkflowUpdate,
                "w1",
                json!({"status": "RUNNING"}),
            ),
        };
        hub.deliver(&envelope);

        assert_eq!(drain(&mut sub_rx).len(), 1);
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn cursor_move_dropped_outside_review() {
        let hub = hub();
        let (a, mut a_rx) = connect(&hub);
        let (b, mut b_rx) = connect(&hub);
        hub.authenticate(a, "alice");
        hub.authenticate(b, "bob");

        hub.handle(
            a,
            ClientMessage::JoinReview {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
            },
        );
        hub.handle(
            b,
            ClientMessage::JoinReview {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
            },
        );
        drain(&mut a_rx);
        drain(&mut b_rx);

        // Bob moves his cursor; Alice sees it.
        hub.handle(
            b,
            ClientMessage::CursorMove {
                file: "src/lib.rs".to_string(),
                line: 3,
                column: 1,
            },
        );
        assert!(drain(&mut a_rx)
            .iter()
            .any(|f| f.kind == MessageType::CursorMove));

        // A third connection that never joined produces nothing.
        let (c, mut c_rx) = connect(&hub);
        hub.authenticate(c, "carol");
        drain(&mut c_rx);
        hub.handle(
            c,
            ClientMessage::CursorMove {
                file: "src/lib.rs".to_string(),
                line: 9,
                column: 1,
            },
        );
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn only_host_toggles_sync_and_navigates() {
        let hub = hub();
        let (host, mut host_rx) = connect(&hub);
        let (guest, mut guest_rx) = connect(&hub);
        hub.authenticate(host, "alice");
        hub.authenticate(guest, "bob");

        hub.handle(
            host,
            ClientMessage::JoinReview {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
            },
        );
        hub.handle(
            guest,
            ClientMessage::JoinReview {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
            },
        );
        hub.handle(
            host,
            ClientMessage::StartSession {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
                sync_navigation: true,
            },
        );
        let session_id = drain(&mut host_rx)
            .into_iter()
            .find(|f| f.kind == MessageType::SessionStarted)
            .and_then(|f| {
                f.data["session"]["id"]
                    .as_str()
                    .map(str::to_string)
            })
            .expect("session id");
        hub.handle(guest, ClientMessage::JoinSession { session_id });
        drain(&mut host_rx);
        drain(&mut guest_rx);

        // Guest tries to toggle: error, no broadcast.
        hub.handle(guest, ClientMessage::ToggleSync { enabled: false });
        assert!(drain(&mut guest_rx)
            .iter()
            .any(|f| f.kind == MessageType::Error));

        // Host navigates: guest follows.
        hub.handle(
            host,
            ClientMessage::NavigateTo {
                file: "src/lib.rs".to_string(),
                line: Some(42),
            },
        );
        assert!(drain(&mut guest_rx)
            .iter()
            .any(|f| f.kind == MessageType::NavigationSync));
    }

    #[tokio::test]
    async fn two_missed_heartbeats_terminate() {
        let hub = hub();
        let (conn, _rx) = connect(&hub);
        hub.authenticate(conn, "alice");

        assert!(hub.sweep().is_empty());
        assert!(hub.sweep().is_empty());
        let dropped = hub.sweep();
        assert_eq!(dropped, vec![conn]);
        assert_eq!(hub.stats().0, 0);
    }

    #[tokio::test]
    async fn ping_resets_heartbeat_counter() {
        let hub = hub();
        let (conn, mut rx) = connect(&hub);
        hub.authenticate(conn, "alice");

        hub.sweep();
        hub.sweep();
        hub.handle(conn, ClientMessage::Ping);
        assert!(drain(&mut rx).iter().any(|f| f.kind == MessageType::Pong));

        // Counter reset: two more sweeps still keep the connection.
        assert!(hub.sweep().is_empty());
        assert!(hub.sweep().is_empty());
        assert_eq!(hub.stats().0, 1);
    }

    #[tokio::test]
    async fn disconnect_reaps_presence_and_sessions() {
        let hub = hub();
        let (conn, mut rx) = connect(&hub);
        hub.authenticate(conn, "alice");
        hub.handle(
            conn,
            ClientMessage::JoinReview {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
            },
        );
        hub.handle(
            conn,
            ClientMessage::StartSession {
                repository_id: "acme/widgets".to_string(),
                pr_number: 7,
                sync_navigation: false,
            },
        );
        drain(&mut rx);
        assert_eq!(hub.stats(), (1, 1, 1));

        hub.disconnect(conn);
        assert_eq!(hub.stats(), (0, 0, 0));
    }
}
