//! Provider-agnostic data model for pull requests and published outputs.
//!
//! These are the normalized inputs for the agent pipeline and the publish
//! layer; provider-specific JSON stays inside each client module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

/// A unique reference to a pull/merge request inside a provider.
///
/// * `repo`   – GitHub: "owner/repo"; GitLab: numeric id or "group/project".
/// * `number` – PR number or MR IID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestId {
    pub repo: String,
    pub number: u64,
}

/// High-level PR metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub provider: ProviderKind,
    pub id: PullRequestId,
    pub title: String,
    pub body: Option<String>,
    pub author_login: String,
    pub head_sha: String,
    pub base_sha: String,
    pub head_ref: String,
    pub base_ref: String,
    pub draft: bool,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a file changed in the PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// One changed file with its unified-diff patch (absent for binary files).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrFile {
    pub path: String,
    pub previous_path: Option<String>,
    pub status: FileStatus,
    pub additions: u64,
    pub deletions: u64,
    pub patch: Option<String>,
}

/// One commit belonging to the PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrCommit {
    pub sha: String,
    pub message: String,
    pub author_login: Option<String>,
}

/// Everything the agent pipeline needs for one PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrBundle {
    pub pr: PullRequest,
    pub files: Vec<PrFile>,
    pub commits: Vec<PrCommit>,
}

/// Check-run lifecycle reported to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

/// Final check-run verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
}

/// Title + summary body for a check-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutput {
    pub title: String,
    pub summary: String,
}

/// An inline review comment ready for the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCommentDraft {
    pub path: String,
    pub line: u32,
    pub end_line: Option<u32>,
    pub body: String,
}

/// Combined CI status for a head sha.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub state: String,
    pub total_count: u64,
}

/// One existing check-run on a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunSummary {
    pub external_id: String,
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
}

/// Branch comparison summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchComparison {
    /// Commits the head branch is behind the base.
    pub behind_by: u64,
    pub ahead_by: u64,
}
