//! Typed records and status enums shared across the workspace.
//!
//! Statuses are stored as TEXT; the enums here are the single source of
//! truth for the string encodings. Timestamps are UTC epoch milliseconds.

use serde::{Deserialize, Serialize};

/// Lifecycle of a workflow (one per PR head-sha transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    Running,
    AwaitingReview,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::AwaitingReview => "AWAITING_REVIEW",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "AWAITING_REVIEW" => Self::AwaitingReview,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Webhook actions that create workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    Opened,
    Synchronize,
    Reopened,
    ReadyForReview,
}

impl TriggerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Synchronize => "synchronize",
            Self::Reopened => "reopened",
            Self::ReadyForReview => "ready_for_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "opened" => Self::Opened,
            "synchronize" => Self::Synchronize,
            "reopened" => Self::Reopened,
            "ready_for_review" => Self::ReadyForReview,
            _ => return None,
        })
    }
}

/// Lifecycle of a single agent run inside a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Timeout,
}

impl AgentRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "SKIPPED" => Self::Skipped,
            "TIMEOUT" => Self::Timeout,
            _ => return None,
        })
    }
}

/// Kinds of persisted workflow outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ReviewComment,
    SummaryComment,
    CheckRun,
    GeneratedTest,
    DocSuggestion,
    IntentAnalysis,
    Prediction,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReviewComment => "review_comment",
            Self::SummaryComment => "summary_comment",
            Self::CheckRun => "check_run",
            Self::GeneratedTest => "generated_test",
            Self::DocSuggestion => "doc_suggestion",
            Self::IntentAnalysis => "intent_analysis",
            Self::Prediction => "prediction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "review_comment" => Self::ReviewComment,
            "summary_comment" => Self::SummaryComment,
            "check_run" => Self::CheckRun,
            "generated_test" => Self::GeneratedTest,
            "doc_suggestion" => Self::DocSuggestion,
            "intent_analysis" => Self::IntentAnalysis,
            "prediction" => Self::Prediction,
            _ => return None,
        })
    }
}

/// Reviewer reaction to an agent suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    Accepted,
    Dismissed,
    Modified,
    ResolvedOther,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Dismissed => "DISMISSED",
            Self::Modified => "MODIFIED",
            Self::ResolvedOther => "RESOLVED_OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ACCEPTED" => Self::Accepted,
            "DISMISSED" => Self::Dismissed,
            "MODIFIED" => Self::Modified,
            "RESOLVED_OTHER" => Self::ResolvedOther,
            _ => return None,
        })
    }
}

/// A deduplicated inbound webhook notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEventRecord {
    pub delivery_id: String,
    pub action: TriggerAction,
    pub repository_id: String,
    pub pr_number: i64,
    pub head_sha: String,
    pub received_at: i64,
}

/// One workflow per PR head-sha transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub repository_id: String,
    pub pr_number: i64,
    pub head_sha: String,
    pub base_sha: String,
    pub author_login: String,
    pub status: WorkflowStatus,
    pub attempt: i64,
    pub trigger_event_id: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Last durable checkpoint; used for crash-safe resumption.
    pub checkpoint_at: i64,
}

/// One agent execution inside a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunRecord {
    pub id: String,
    pub workflow_id: String,
    pub agent_name: String,
    pub status: AgentRunStatus,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
    /// Structured, agent-specific output; immutable once SUCCEEDED.
    pub output: Option<serde_json::Value>,
}

/// A named, content-addressed workflow output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub workflow_id: String,
    pub kind: ArtifactKind,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub published_at: Option<i64>,
    pub external_id: Option<String>,
}

/// Captured reviewer decision on a published suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub repository_id: String,
    pub workflow_id: String,
    pub comment_artifact_id: String,
    pub reviewer_id: String,
    pub action: DecisionAction,
    /// File, line, category, severity, snippet, language.
    pub context: serde_json::Value,
    pub feedback: Option<String>,
    pub created_at: i64,
}

/// Per-repository webhook processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSettingsRecord {
    pub repository_id: String,
    pub enabled: bool,
    /// Regex matched against the PR head ref; matching branches are skipped.
    pub exclude_branches: Option<String>,
    /// Path prefixes; when non-empty, at least one changed file must match.
    pub include_paths: Vec<String>,
    pub updated_at: i64,
}

impl RepoSettingsRecord {
    /// Default settings: processing enabled, no filters.
    pub fn default_for(repository_id: &str) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            enabled: true,
            exclude_branches: None,
            include_paths: Vec::new(),
            updated_at: crate::now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_encodings_round_trip() {
        for s in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::AwaitingReview,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(WorkflowStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(WorkflowStatus::parse("NOPE"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::AwaitingReview.is_terminal());
    }

    #[test]
    fn trigger_action_uses_provider_wire_strings() {
        assert_eq!(TriggerAction::ReadyForReview.as_str(), "ready_for_review");
        assert_eq!(
            TriggerAction::parse("synchronize"),
            Some(TriggerAction::Synchronize)
        );
        assert_eq!(TriggerAction::parse("closed"), None);
    }
}
