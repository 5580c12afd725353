//! Provider facade w/o async-trait or dynamic trait objects.
//!
//! `ProviderClient` is an enum with concrete implementations per provider;
//! async fns stay simple and futures stay unboxed. Every operation returns
//! the provider's identifier or a typed [`ProviderError`].

pub mod github;
pub mod gitlab;

use crate::errors::{Error, GitResult, ProviderError};
use crate::types::{
    BranchComparison, CheckConclusion, CheckOutput, CheckRunSummary, CheckStatus, CombinedStatus,
    PrBundle, PrCommit, PrFile, PullRequest, PullRequestId, ReviewCommentDraft,
};

/// Runtime configuration for any provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: crate::types::ProviderKind,
    /// API base, e.g. "https://api.github.com" or "https://gitlab.com/api/v4".
    pub base_api: String,
    /// Access token (installation token or PAT).
    pub token: String,
    /// App installation the token belongs to; callers pass it explicitly,
    /// there is no environment fallback here.
    pub installation_id: String,
}

impl ProviderConfig {
    fn validate(&self) -> GitResult<()> {
        if self.token.trim().is_empty() {
            return Err(Error::Config("missing provider token".into()));
        }
        let base = self.base_api.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::Config(format!("invalid base api url: {base}")));
        }
        Ok(())
    }
}

/// Concrete provider client (enum-dispatch).
#[derive(Debug, Clone)]
pub enum ProviderClient {
    GitHub(github::GitHubClient),
    GitLab(gitlab::GitLabClient),
}

impl ProviderClient {
    /// Constructs a concrete client from generic config.
    pub fn from_config(cfg: ProviderConfig) -> GitResult<Self> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .user_agent("pr-ai-backend/0.1")
            .build()?;
        Ok(match cfg.kind {
            crate::types::ProviderKind::GitHub => {
                Self::GitHub(github::GitHubClient::new(client, cfg.base_api, cfg.token))
            }
            crate::types::ProviderKind::GitLab => {
                Self::GitLab(gitlab::GitLabClient::new(client, cfg.base_api, cfg.token))
            }
        })
    }

    pub async fn get_pull_request(&self, id: &PullRequestId) -> GitResult<PullRequest> {
        match self {
            Self::GitHub(c) => c.get_pull_request(id).await,
            Self::GitLab(c) => c.get_pull_request(id).await,
        }
    }

    pub async fn get_pull_request_files(&self, id: &PullRequestId) -> GitResult<Vec<PrFile>> {
        match self {
            Self::GitHub(c) => c.get_pull_request_files(id).await,
            Self::GitLab(c) => c.get_pull_request_files(id).await,
        }
    }

    pub async fn get_pull_request_commits(&self, id: &PullRequestId) -> GitResult<Vec<PrCommit>> {
        match self {
            Self::GitHub(c) => c.get_pull_request_commits(id).await,
            Self::GitLab(c) => c.get_pull_request_commits(id).await,
        }
    }

    /// Raw unified diff for the whole PR.
    pub async fn get_pull_request_diff(&self, id: &PullRequestId) -> GitResult<String> {
        match self {
            Self::GitHub(c) => c.get_pull_request_diff(id).await,
            Self::GitLab(c) => c.get_pull_request_diff(id).await,
        }
    }

    /// Raw file bytes at a ref. `Ok(None)` when the path is absent at the ref.
    pub async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> GitResult<Option<String>> {
        match self {
            Self::GitHub(c) => c.get_file_content(id, path, git_ref).await,
            Self::GitLab(c) => c.get_file_content(id, path, git_ref).await,
        }
    }

    pub async fn create_check_run(
        &self,
        id: &PullRequestId,
        name: &str,
        head_sha: &str,
        status: CheckStatus,
        conclusion: Option<CheckConclusion>,
        output: &CheckOutput,
    ) -> GitResult<String> {
        match self {
            Self::GitHub(c) => {
                c.create_check_run(id, name, head_sha, status, conclusion, output)
                    .await
            }
            Self::GitLab(c) => {
                c.create_check_run(id, name, head_sha, status, conclusion, output)
                    .await
            }
        }
    }

    pub async fn update_check_run(
        &self,
        id: &PullRequestId,
        external_id: &str,
        status: CheckStatus,
        conclusion: Option<CheckConclusion>,
        output: &CheckOutput,
    ) -> GitResult<String> {
        match self {
            Self::GitHub(c) => {
                c.update_check_run(id, external_id, status, conclusion, output)
                    .await
            }
            Self::GitLab(c) => {
                c.update_check_run(id, external_id, status, conclusion, output)
                    .await
            }
        }
    }

    /// One inline review comment.
    pub async fn create_review_comment(
        &self,
        id: &PullRequestId,
        head_sha: &str,
        comment: &ReviewCommentDraft,
    ) -> GitResult<String> {
        match self {
            Self::GitHub(c) => c.create_review_comment(id, head_sha, comment).await,
            Self::GitLab(c) => c.create_review_comment(id, head_sha, comment).await,
        }
    }

    /// Batch review: all comments posted as one review where the provider
    /// supports it.
    pub async fn create_review(
        &self,
        id: &PullRequestId,
        head_sha: &str,
        body: &str,
        comments: &[ReviewCommentDraft],
    ) -> GitResult<String> {
        match self {
            Self::GitHub(c) => c.create_review(id, head_sha, body, comments).await,
            Self::GitLab(c) => c.create_review(id, head_sha, body, comments).await,
        }
    }

    pub async fn create_issue_comment(&self, id: &PullRequestId, body: &str) -> GitResult<String> {
        match self {
            Self::GitHub(c) => c.create_issue_comment(id, body).await,
            Self::GitLab(c) => c.create_issue_comment(id, body).await,
        }
    }

    /// Bodies of existing PR-level comments (idempotency marker scan).
    pub async fn list_issue_comments(
        &self,
        id: &PullRequestId,
    ) -> GitResult<Vec<(String, String)>> {
        match self {
            Self::GitHub(c) => c.list_issue_comments(id).await,
            Self::GitLab(c) => c.list_issue_comments(id).await,
        }
    }

    pub async fn request_reviewers(&self, id: &PullRequestId, logins: &[String]) -> GitResult<()> {
        match self {
            Self::GitHub(c) => c.request_reviewers(id, logins).await,
            Self::GitLab(c) => c.request_reviewers(id, logins).await,
        }
    }

    pub async fn get_combined_status(
        &self,
        id: &PullRequestId,
        sha: &str,
    ) -> GitResult<CombinedStatus> {
        match self {
            Self::GitHub(c) => c.get_combined_status(id, sha).await,
            Self::GitLab(c) => c.get_combined_status(id, sha).await,
        }
    }

    /// Existing check-runs for a commit.
    pub async fn get_check_runs(
        &self,
        id: &PullRequestId,
        sha: &str,
    ) -> GitResult<Vec<CheckRunSummary>> {
        match self {
            Self::GitHub(c) => c.get_check_runs(id, sha).await,
            Self::GitLab(c) => c.get_check_runs(id, sha).await,
        }
    }

    pub async fn compare_branches(
        &self,
        id: &PullRequestId,
        base: &str,
        head: &str,
    ) -> GitResult<BranchComparison> {
        match self {
            Self::GitHub(c) => c.compare_branches(id, base, head).await,
            Self::GitLab(c) => c.compare_branches(id, base, head).await,
        }
    }

    pub async fn update_branch(&self, id: &PullRequestId) -> GitResult<()> {
        match self {
            Self::GitHub(c) => c.update_branch(id).await,
            Self::GitLab(c) => c.update_branch(id).await,
        }
    }

    /// CODEOWNERS content at the head ref, trying the conventional locations.
    pub async fn get_codeowners(
        &self,
        id: &PullRequestId,
        git_ref: &str,
    ) -> GitResult<Option<String>> {
        for path in [".github/CODEOWNERS", "CODEOWNERS", "docs/CODEOWNERS"] {
            if let Some(content) = self.get_file_content(id, path, git_ref).await? {
                return Ok(Some(content));
            }
        }
        Ok(None)
    }

    /// Convenience all-in-one fetch (meta + files + commits).
    pub async fn fetch_bundle(&self, id: &PullRequestId) -> GitResult<PrBundle> {
        let pr = self.get_pull_request(id).await?;
        let files = self.get_pull_request_files(id).await?;
        let commits = self.get_pull_request_commits(id).await?;
        Ok(PrBundle { pr, files, commits })
    }
}

/// Map a non-success HTTP response into a typed provider error, consuming
/// the body for `Retry-After` / abuse detection.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(300)
        .collect();

    match status {
        401 => ProviderError::Unauthorized,
        403 => {
            let lowered = body.to_ascii_lowercase();
            if lowered.contains("abuse") || lowered.contains("secondary rate limit") {
                ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                }
            } else {
                ProviderError::Forbidden { abuse: false }
            }
        }
        404 => ProviderError::NotFound,
        422 => ProviderError::Validation(body),
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after,
        },
        500..=599 => ProviderError::Server(status),
        other => ProviderError::HttpStatus(other),
    }
}
