//! GitLab REST v4 client.
//!
//! Merge requests map onto the provider-agnostic PR model:
//! - check runs   → commit statuses (`POST /projects/:id/statuses/:sha`)
//! - batch review → one discussion per comment (GitLab has no review object)
//! - summary      → MR note
//!
//! Project paths are URL-encoded; MR IIDs are used verbatim.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::error_from_response;
use crate::errors::{GitResult, ProviderError};
use crate::types::{
    BranchComparison, CheckConclusion, CheckOutput, CheckRunSummary, CheckStatus, CombinedStatus,
    FileStatus, PrCommit, PrFile, ProviderKind, PullRequest, PullRequestId, ReviewCommentDraft,
};

/// GitLab client over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    base_api: String,
    token: String,
}

impl GitLabClient {
    pub fn new(http: reqwest::Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(token) = HeaderValue::from_str(&self.token) {
            headers.insert("PRIVATE-TOKEN", token);
        }
        headers
    }

    fn project_url(&self, id: &PullRequestId) -> String {
        format!(
            "{}/projects/{}",
            self.base_api,
            urlencoding::encode(&id.repo)
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> GitResult<T> {
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        let raw = response.bytes().await?;
        let parsed = serde_json::from_slice(&raw).map_err(ProviderError::Serde)?;
        Ok(parsed)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> GitResult<T> {
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        let raw = response.bytes().await?;
        let parsed = serde_json::from_slice(&raw).map_err(ProviderError::Serde)?;
        Ok(parsed)
    }

    pub async fn get_pull_request(&self, id: &PullRequestId) -> GitResult<PullRequest> {
        let url = format!("{}/merge_requests/{}", self.project_url(id), id.number);
        let mr: GlMergeRequest = self.get_json(url).await?;
        let stats = mr.changes_count.unwrap_or_default();
        Ok(PullRequest {
            provider: ProviderKind::GitLab,
            id: id.clone(),
            title: mr.title,
            body: mr.description,
            author_login: mr.author.map(|a| a.username).unwrap_or_default(),
            head_sha: mr.diff_refs.as_ref().map(|d| d.head_sha.clone()).unwrap_or(mr.sha.unwrap_or_default()),
            base_sha: mr
                .diff_refs
                .map(|d| d.base_sha)
                .unwrap_or_default(),
            head_ref: mr.source_branch,
            base_ref: mr.target_branch,
            draft: mr.draft,
            additions: 0,
            deletions: 0,
            changed_files: stats.parse().unwrap_or(0),
            created_at: mr.created_at,
            updated_at: mr.updated_at,
        })
    }

    pub async fn get_pull_request_files(&self, id: &PullRequestId) -> GitResult<Vec<PrFile>> {
        let url = format!(
            "{}/merge_requests/{}/changes",
            self.project_url(id),
            id.number
        );
        let changes: GlChanges = self.get_json(url).await?;
        let files = changes
            .changes
            .into_iter()
            .map(|c| {
                let status = if c.new_file {
                    FileStatus::Added
                } else if c.deleted_file {
                    FileStatus::Removed
                } else if c.renamed_file {
                    FileStatus::Renamed
                } else {
                    FileStatus::Modified
                };
                let (additions, deletions) = count_diff_lines(c.diff.as_deref().unwrap_or(""));
                PrFile {
                    path: c.new_path.clone(),
                    previous_path: if c.renamed_file {
                        Some(c.old_path)
                    } else {
                        None
                    },
                    status,
                    additions,
                    deletions,
                    patch: c.diff,
                }
            })
            .collect::<Vec<_>>();
        debug!(files = files.len(), "gitlab: merge request changes fetched");
        Ok(files)
    }

    pub async fn get_pull_request_commits(&self, id: &PullRequestId) -> GitResult<Vec<PrCommit>> {
        let url = format!(
            "{}/merge_requests/{}/commits",
            self.project_url(id),
            id.number
        );
        let commits: Vec<GlCommit> = self.get_json(url).await?;
        Ok(commits
            .into_iter()
            .map(|c| PrCommit {
                sha: c.id,
                message: c.message.unwrap_or(c.title),
                author_login: c.author_name,
            })
            .collect())
    }

    pub async fn get_pull_request_diff(&self, id: &PullRequestId) -> GitResult<String> {
        let files = self.get_pull_request_files(id).await?;
        let mut out = String::new();
        for f in files {
            if let Some(patch) = f.patch {
                out.push_str("--- a/");
                out.push_str(f.previous_path.as_deref().unwrap_or(&f.path));
                out.push_str("\n+++ b/");
                out.push_str(&f.path);
                out.push('\n');
                out.push_str(&patch);
                if !patch.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }

    pub async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> GitResult<Option<String>> {
        let url = format!(
            "{}/repository/files/{}/raw?ref={git_ref}",
            self.project_url(id),
            urlencoding::encode(path)
        );
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        Ok(Some(response.text().await?))
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
        let url = format!("{}/statuses/{head_sha}", self.project_url(id));
        let state = gitlab_state(status, conclusion);
        let body = json!({
            "state": state,
            "name": name,
            "description": output.title,
        });
        let created: GlId = self.post_json(url, &body).await?;
        Ok(created.id.to_string())
    }

    /// GitLab commit statuses are append-only; an update posts a new state
    /// under the same name and keeps the caller's external id stable.
    pub async fn update_check_run(
        &self,
        id: &PullRequestId,
        external_id: &str,
        status: CheckStatus,
        conclusion: Option<CheckConclusion>,
        output: &CheckOutput,
    ) -> GitResult<String> {
        // Need the head sha to post a status; callers track it in the PR meta.
        let pr = self.get_pull_request(id).await?;
        self.create_check_run(id, "pr-ai-review", &pr.head_sha, status, conclusion, output)
            .await?;
        Ok(external_id.to_string())
    }

    pub async fn create_review_comment(
        &self,
        id: &PullRequestId,
        head_sha: &str,
        comment: &ReviewCommentDraft,
    ) -> GitResult<String> {
        let pr = self.get_pull_request(id).await?;
        let url = format!(
            "{}/merge_requests/{}/discussions",
            self.project_url(id),
            id.number
        );
        let body = json!({
            "body": comment.body,
            "position": {
                "position_type": "text",
                "base_sha": pr.base_sha,
                "head_sha": head_sha,
                "start_sha": pr.base_sha,
                "new_path": comment.path,
                "new_line": comment.end_line.unwrap_or(comment.line),
            }
        });
        let created: GlDiscussion = self.post_json(url, &body).await?;
        Ok(created.id)
    }

    pub async fn create_review(
        &self,
        id: &PullRequestId,
        head_sha: &str,
        body: &str,
        comments: &[ReviewCommentDraft],
    ) -> GitResult<String> {
        // No review object on GitLab: emit one discussion per comment and a
        // trailing note with the batch body.
        for comment in comments {
            self.create_review_comment(id, head_sha, comment).await?;
        }
        self.create_issue_comment(id, body).await
    }

    pub async fn create_issue_comment(&self, id: &PullRequestId, body: &str) -> GitResult<String> {
        let url = format!("{}/merge_requests/{}/notes", self.project_url(id), id.number);
        let created: GlId = self.post_json(url, &json!({"body": body})).await?;
        Ok(created.id.to_string())
    }

    pub async fn list_issue_comments(
        &self,
        id: &PullRequestId,
    ) -> GitResult<Vec<(String, String)>> {
        let url = format!(
            "{}/merge_requests/{}/notes?per_page=100",
            self.project_url(id),
            id.number
        );
        let notes: Vec<GlNote> = self.get_json(url).await?;
        Ok(notes
            .into_iter()
            .map(|n| (n.id.to_string(), n.body))
            .collect())
    }

    pub async fn request_reviewers(&self, id: &PullRequestId, logins: &[String]) -> GitResult<()> {
        let mut reviewer_ids = Vec::new();
        for login in logins {
            let url = format!(
                "{}/users?username={}",
                self.base_api,
                urlencoding::encode(login)
            );
            let users: Vec<GlId> = self.get_json(url).await?;
            if let Some(user) = users.first() {
                reviewer_ids.push(user.id);
            }
        }
        if reviewer_ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}/merge_requests/{}", self.project_url(id), id.number);
        let response = self
            .http
            .put(&url)
            .headers(self.headers())
            .json(&json!({"reviewer_ids": reviewer_ids}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        Ok(())
    }

    pub async fn get_combined_status(
        &self,
        id: &PullRequestId,
        sha: &str,
    ) -> GitResult<CombinedStatus> {
        let url = format!(
            "{}/repository/commits/{sha}/statuses",
            self.project_url(id)
        );
        let statuses: Vec<GlStatus> = self.get_json(url).await?;
        let total_count = statuses.len() as u64;
        let state = if statuses.iter().any(|s| s.status == "failed") {
            "failure"
        } else if statuses.iter().all(|s| s.status == "success") && total_count > 0 {
            "success"
        } else {
            "pending"
        };
        Ok(CombinedStatus {
            state: state.to_string(),
            total_count,
        })
    }

    /// Commit statuses double as check-runs on GitLab.
    pub async fn get_check_runs(
        &self,
        id: &PullRequestId,
        sha: &str,
    ) -> GitResult<Vec<CheckRunSummary>> {
        let url = format!(
            "{}/repository/commits/{sha}/statuses",
            self.project_url(id)
        );
        let statuses: Vec<GlNamedStatus> = self.get_json(url).await?;
        Ok(statuses
            .into_iter()
            .map(|s| CheckRunSummary {
                external_id: s.id.to_string(),
                name: s.name.unwrap_or_else(|| "default".to_string()),
                conclusion: match s.status.as_str() {
                    "success" => Some("success".to_string()),
                    "failed" => Some("failure".to_string()),
                    "canceled" => Some("cancelled".to_string()),
                    _ => None,
                },
                status: s.status,
            })
            .collect())
    }

    pub async fn compare_branches(
        &self,
        id: &PullRequestId,
        base: &str,
        head: &str,
    ) -> GitResult<BranchComparison> {
        let url = format!(
            "{}/repository/compare?from={}&to={}",
            self.project_url(id),
            urlencoding::encode(base),
            urlencoding::encode(head)
        );
        let cmp: GlComparison = self.get_json(url).await?;
        Ok(BranchComparison {
            // GitLab reports only the forward direction; behind-by requires
            // the reverse compare.
            behind_by: 0,
            ahead_by: cmp.commits.len() as u64,
        })
    }

    pub async fn update_branch(&self, id: &PullRequestId) -> GitResult<()> {
        let url = format!(
            "{}/merge_requests/{}/rebase",
            self.project_url(id),
            id.number
        );
        let response = self
            .http
            .put(&url)
            .headers(self.headers())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        Ok(())
    }
}

fn gitlab_state(status: CheckStatus, conclusion: Option<CheckConclusion>) -> &'static str {
    match (status, conclusion) {
        (CheckStatus::Completed, Some(CheckConclusion::Success)) => "success",
        (CheckStatus::Completed, Some(CheckConclusion::Failure)) => "failed",
        (CheckStatus::Completed, Some(CheckConclusion::Cancelled)) => "canceled",
        (CheckStatus::Completed, _) => "success",
        (CheckStatus::InProgress, _) => "running",
        (CheckStatus::Queued, _) => "pending",
    }
}

/// Count +/- lines in a unified diff body (GitLab omits per-file stats).
fn count_diff_lines(diff: &str) -> (u64, u64) {
    let mut additions = 0;
    let mut deletions = 0;
    for line in diff.lines() {
        if line.starts_with('+') && !line.starts_with("+++") {
            additions += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            deletions += 1;
        }
    }
    (additions, deletions)
}

// ----- wire types -----

#[derive(Deserialize)]
struct GlMergeRequest {
    title: String,
    description: Option<String>,
    author: Option<GlUser>,
    sha: Option<String>,
    diff_refs: Option<GlDiffRefs>,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    draft: bool,
    changes_count: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GlUser {
    username: String,
}

#[derive(Deserialize)]
struct GlDiffRefs {
    base_sha: String,
    head_sha: String,
}

#[derive(Deserialize)]
struct GlChanges {
    changes: Vec<GlChange>,
}

#[derive(Deserialize)]
struct GlChange {
    old_path: String,
    new_path: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
    #[serde(default)]
    renamed_file: bool,
    diff: Option<String>,
}

#[derive(Deserialize)]
struct GlCommit {
    id: String,
    title: String,
    message: Option<String>,
    author_name: Option<String>,
}

#[derive(Deserialize)]
struct GlId {
    id: u64,
}

#[derive(Deserialize)]
struct GlDiscussion {
    id: String,
}

#[derive(Deserialize)]
struct GlNote {
    id: u64,
    body: String,
}

#[derive(Deserialize)]
struct GlStatus {
    status: String,
}

#[derive(Deserialize)]
struct GlNamedStatus {
    id: u64,
    name: Option<String>,
    status: String,
}

#[derive(Deserialize)]
struct GlComparison {
    #[serde(default)]
    commits: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_line_counting_skips_headers() {
        let diff = "@@ -1,3 +1,4 @@\n+added\n-removed\n context\n+++ b/x\n--- a/x\n+also added\n";
        let (additions, deletions) = count_diff_lines(diff);
        assert_eq!(additions, 2);
        assert_eq!(deletions, 1);
    }

    #[test]
    fn state_mapping_covers_lifecycle() {
        assert_eq!(gitlab_state(CheckStatus::Queued, None), "pending");
        assert_eq!(gitlab_state(CheckStatus::InProgress, None), "running");
        assert_eq!(
            gitlab_state(CheckStatus::Completed, Some(CheckConclusion::Failure)),
            "failed"
        );
    }
}
