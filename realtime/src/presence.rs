//! Ephemeral presence and co-review session state.
//!
//! Nothing here persists: both maps are garbage-collected when the last
//! participant disconnects or after 24 h of inactivity.

use serde::{Deserialize, Serialize};

use crate::messages::PresenceStatus;

/// Idle lifetime before GC reaps a presence row or session.
pub const MAX_IDLE_MS: i64 = 24 * 60 * 60 * 1000;

/// Key for per-PR review rooms: `repo#pr`.
pub fn repo_key(repository_id: &str, pr_number: i64) -> String {
    format!("{repository_id}#{pr_number}")
}

/// One user's live position on a PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presence {
    pub repository_id: String,
    pub pr_number: i64,
    pub user_id: String,
    pub status: PresenceStatus,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
    /// UTC epoch milliseconds of the last activity.
    pub last_activity: i64,
}

impl Presence {
    pub fn new(repository_id: &str, pr_number: i64, user_id: &str) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            pr_number,
            user_id: user_id.to_string(),
            status: PresenceStatus::Viewing,
            current_file: None,
            current_line: None,
            last_activity: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = chrono::Utc::now().timestamp_millis();
    }

    pub fn is_stale(&self, now_ms: i64) -> bool {
        now_ms - self.last_activity > MAX_IDLE_MS
    }
}

/// A synchronized co-review session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSession {
    pub id: String,
    pub repository_id: String,
    pub pr_number: i64,
    pub host_user_id: String,
    pub participants: Vec<String>,
    pub sync_navigation: bool,
    pub current_file: Option<String>,
    pub current_line: Option<u32>,
    pub last_activity: i64,
}

impl ReviewSession {
    pub fn new(repository_id: &str, pr_number: i64, host_user_id: &str, sync: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repository_id.to_string(),
            pr_number,
            host_user_id: host_user_id.to_string(),
            participants: vec![host_user_id.to_string()],
            sync_navigation: sync,
            current_file: None,
            current_line: None,
            last_activity: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = chrono::Utc::now().timestamp_millis();
    }

    pub fn is_stale(&self, now_ms: i64) -> bool {
        self.participants.is_empty() || now_ms - self.last_activity > MAX_IDLE_MS
    }

    pub fn remove_participant(&mut self, user_id: &str) {
        self.participants.retain(|p| p != user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_goes_stale_after_a_day() {
        let mut presence = Presence::new("acme/widgets", 7, "alice");
        let now = chrono::Utc::now().timestamp_millis();
        assert!(!presence.is_stale(now));

        presence.last_activity = now - MAX_IDLE_MS - 1;
        assert!(presence.is_stale(now));
    }

    #[test]
    fn empty_session_is_stale_immediately() {
        let mut session = ReviewSession::new("acme/widgets", 7, "alice", true);
        let now = chrono::Utc::now().timestamp_millis();
        assert!(!session.is_stale(now));

        session.remove_participant("alice");
        assert!(session.is_stale(now));
    }
}
