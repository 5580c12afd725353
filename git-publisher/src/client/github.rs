//! GitHub REST v3 client.
//!
//! Endpoints used:
//! - GET  /repos/:repo/pulls/:n                (meta)
//! - GET  /repos/:repo/pulls/:n/files          (changed files, paged)
//! - GET  /repos/:repo/pulls/:n/commits        (commits, paged)
//! - POST /repos/:repo/check-runs              (check runs)
//! - POST /repos/:repo/pulls/:n/reviews        (batch review)
//! - POST /repos/:repo/issues/:n/comments      (summary comment)
//!
//! File content is fetched with the raw media type so no base64 step is
//! needed.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::error_from_response;
use crate::errors::{GitResult, ProviderError};
use crate::types::{
    BranchComparison, CheckConclusion, CheckOutput, CheckRunSummary, CheckStatus, CombinedStatus,
    FileStatus, PrCommit, PrFile, ProviderKind, PullRequest, PullRequestId, ReviewCommentDraft,
};

const PAGE_SIZE: u32 = 100;

/// GitHub client over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_api: String,
    token: String,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, base_api: String, token: String) -> Self {
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn headers(&self, accept: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", self.token)) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> GitResult<T> {
        let response = self
            .http
            .get(&url)
            .headers(self.headers("application/vnd.github+json"))
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
        let url = format!("{}/repos/{}/pulls/{}", self.base_api, id.repo, id.number);
        let pr: GhPull = self.get_json(url).await?;
        Ok(PullRequest {
            provider: ProviderKind::GitHub,
            id: id.clone(),
            title: pr.title,
            body: pr.body,
            author_login: pr.user.map(|u| u.login).unwrap_or_default(),
            head_sha: pr.head.sha,
            base_sha: pr.base.sha,
            head_ref: pr.head.r#ref,
            base_ref: pr.base.r#ref,
            draft: pr.draft,
            additions: pr.additions,
            deletions: pr.deletions,
            changed_files: pr.changed_files,
            created_at: pr.created_at,
            updated_at: pr.updated_at,
        })
    }

    pub async fn get_pull_request_files(&self, id: &PullRequestId) -> GitResult<Vec<PrFile>> {
        let mut files = Vec::new();
        let mut page = 1u32;
        loop {
            let url = format!(
                "{}/repos/{}/pulls/{}/files?per_page={PAGE_SIZE}&page={page}",
                self.base_api, id.repo, id.number
            );
            let batch: Vec<GhFile> = self.get_json(url).await?;
            let done = (batch.len() as u32) < PAGE_SIZE;
            files.extend(batch.into_iter().map(|f| PrFile {
                path: f.filename,
                previous_path: f.previous_filename,
                status: match f.status.as_str() {
                    "added" => FileStatus::Added,
                    "removed" => FileStatus::Removed,
                    "renamed" => FileStatus::Renamed,
                    _ => FileStatus::Modified,
                },
                additions: f.additions,
                deletions: f.deletions,
                patch: f.patch,
            }));
            if done {
                break;
            }
            page += 1;
        }
        debug!(files = files.len(), "github: pull request files fetched");
        Ok(files)
    }

    pub async fn get_pull_request_commits(&self, id: &PullRequestId) -> GitResult<Vec<PrCommit>> {
        let url = format!(
            "{}/repos/{}/pulls/{}/commits?per_page={PAGE_SIZE}",
            self.base_api, id.repo, id.number
        );
        let commits: Vec<GhCommit> = self.get_json(url).await?;
        Ok(commits
            .into_iter()
            .map(|c| PrCommit {
                sha: c.sha,
                message: c.commit.message,
                author_login: c.author.map(|a| a.login),
            })
            .collect())
    }

    pub async fn get_pull_request_diff(&self, id: &PullRequestId) -> GitResult<String> {
        let url = format!("{}/repos/{}/pulls/{}", self.base_api, id.repo, id.number);
        let response = self
            .http
            .get(&url)
            .headers(self.headers("application/vnd.github.v3.diff"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        Ok(response.text().await?)
    }

    pub async fn get_file_content(
        &self,
        id: &PullRequestId,
        path: &str,
        git_ref: &str,
    ) -> GitResult<Option<String>> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.base_api, id.repo, path, git_ref
        );
        let response = self
            .http
            .get(&url)
            .headers(self.headers("application/vnd.github.raw+json"))
            .send()
            .await?;
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
        let url = format!("{}/repos/{}/check-runs", self.base_api, id.repo);
        let mut body = json!({
            "name": name,
            "head_sha": head_sha,
            "status": check_status_str(status),
            "output": {"title": output.title, "summary": output.summary},
        });
        if let Some(conclusion) = conclusion {
            body["conclusion"] = json!(conclusion_str(conclusion));
        }
        let created: GhId = self.post_json(url, &body).await?;
        Ok(created.id.to_string())
    }

    pub async fn update_check_run(
        &self,
        id: &PullRequestId,
        external_id: &str,
        status: CheckStatus,
        conclusion: Option<CheckConclusion>,
        output: &CheckOutput,
    ) -> GitResult<String> {
        let url = format!(
            "{}/repos/{}/check-runs/{external_id}",
            self.base_api, id.repo
        );
        let mut body = json!({
            "status": check_status_str(status),
            "output": {"title": output.title, "summary": output.summary},
        });
        if let Some(conclusion) = conclusion {
            body["conclusion"] = json!(conclusion_str(conclusion));
        }
        let response = self
            .http
            .patch(&url)
            .headers(self.headers("application/vnd.github+json"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        Ok(external_id.to_string())
    }

    pub async fn create_review_comment(
        &self,
        id: &PullRequestId,
        head_sha: &str,
        comment: &ReviewCommentDraft,
    ) -> GitResult<String> {
        let url = format!(
            "{}/repos/{}/pulls/{}/comments",
            self.base_api, id.repo, id.number
        );
        let mut body = json!({
            "body": comment.body,
            "commit_id": head_sha,
            "path": comment.path,
            "line": comment.line,
            "side": "RIGHT",
        });
        if let Some(end) = comment.end_line {
            if end > comment.line {
                body["start_line"] = json!(comment.line);
                body["line"] = json!(end);
                body["start_side"] = json!("RIGHT");
            }
        }
        let created: GhId = self.post_json(url, &body).await?;
        Ok(created.id.to_string())
    }

    pub async fn create_review(
        &self,
        id: &PullRequestId,
        head_sha: &str,
        body: &str,
        comments: &[ReviewCommentDraft],
    ) -> GitResult<String> {
        let url = format!(
            "{}/repos/{}/pulls/{}/reviews",
            self.base_api, id.repo, id.number
        );
        let wire_comments: Vec<serde_json::Value> = comments
            .iter()
            .map(|c| {
                json!({
                    "path": c.path,
                    "line": c.end_line.unwrap_or(c.line),
                    "side": "RIGHT",
                    "body": c.body,
                })
            })
            .collect();
        let payload = json!({
            "commit_id": head_sha,
            "event": "COMMENT",
            "body": body,
            "comments": wire_comments,
        });
        let created: GhId = self.post_json(url, &payload).await?;
        Ok(created.id.to_string())
    }

    pub async fn create_issue_comment(&self, id: &PullRequestId, body: &str) -> GitResult<String> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.base_api, id.repo, id.number
        );
        let created: GhId = self.post_json(url, &json!({"body": body})).await?;
        Ok(created.id.to_string())
    }

    pub async fn list_issue_comments(
        &self,
        id: &PullRequestId,
    ) -> GitResult<Vec<(String, String)>> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments?per_page={PAGE_SIZE}",
            self.base_api, id.repo, id.number
        );
        let comments: Vec<GhComment> = self.get_json(url).await?;
        Ok(comments
            .into_iter()
            .map(|c| (c.id.to_string(), c.body.unwrap_or_default()))
            .collect())
    }

    pub async fn request_reviewers(&self, id: &PullRequestId, logins: &[String]) -> GitResult<()> {
        let url = format!(
            "{}/repos/{}/pulls/{}/requested_reviewers",
            self.base_api, id.repo, id.number
        );
        let response = self
            .http
            .post(&url)
            .headers(self.headers("application/vnd.github+json"))
            .json(&json!({"reviewers": logins}))
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
            "{}/repos/{}/commits/{sha}/status",
            self.base_api, id.repo
        );
        let status: GhCombinedStatus = self.get_json(url).await?;
        Ok(CombinedStatus {
            state: status.state,
            total_count: status.total_count,
        })
    }

    pub async fn get_check_runs(
        &self,
        id: &PullRequestId,
        sha: &str,
    ) -> GitResult<Vec<CheckRunSummary>> {
        let url = format!(
            "{}/repos/{}/commits/{sha}/check-runs",
            self.base_api, id.repo
        );
        let listing: GhCheckRuns = self.get_json(url).await?;
        Ok(listing
            .check_runs
            .into_iter()
            .map(|c| CheckRunSummary {
                external_id: c.id.to_string(),
                name: c.name,
                status: c.status,
                conclusion: c.conclusion,
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
            "{}/repos/{}/compare/{base}...{head}",
            self.base_api, id.repo
        );
        let cmp: GhComparison = self.get_json(url).await?;
        Ok(BranchComparison {
            behind_by: cmp.behind_by,
            ahead_by: cmp.ahead_by,
        })
    }

    pub async fn update_branch(&self, id: &PullRequestId) -> GitResult<()> {
        let url = format!(
            "{}/repos/{}/pulls/{}/update-branch",
            self.base_api, id.repo, id.number
        );
        let response = self
            .http
            .put(&url)
            .headers(self.headers("application/vnd.github+json"))
            .json(&json!({}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await.into());
        }
        Ok(())
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> GitResult<T> {
        let response = self
            .http
            .post(&url)
            .headers(self.headers("application/vnd.github+json"))
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
}

// ----- wire types -----

#[derive(Deserialize)]
struct GhPull {
    title: String,
    body: Option<String>,
    user: Option<GhUser>,
    head: GhRef,
    base: GhRef,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changed_files: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Deserialize)]
struct GhRef {
    sha: String,
    r#ref: String,
}

#[derive(Deserialize)]
struct GhFile {
    filename: String,
    previous_filename: Option<String>,
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    patch: Option<String>,
}

#[derive(Deserialize)]
struct GhCommit {
    sha: String,
    commit: GhCommitInner,
    author: Option<GhUser>,
}

#[derive(Deserialize)]
struct GhCommitInner {
    message: String,
}

#[derive(Deserialize)]
struct GhId {
    id: u64,
}

#[derive(Deserialize)]
struct GhComment {
    id: u64,
    body: Option<String>,
}

#[derive(Deserialize)]
struct GhCheckRuns {
    #[serde(default)]
    check_runs: Vec<GhCheckRun>,
}

#[derive(Deserialize)]
struct GhCheckRun {
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct GhCombinedStatus {
    state: String,
    #[serde(default)]
    total_count: u64,
}

#[derive(Deserialize)]
struct GhComparison {
    #[serde(default)]
    behind_by: u64,
    #[serde(default)]
    ahead_by: u64,
}

fn check_status_str(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Queued => "queued",
        CheckStatus::InProgress => "in_progress",
        CheckStatus::Completed => "completed",
    }
}

fn conclusion_str(conclusion: CheckConclusion) -> &'static str {
    match conclusion {
        CheckConclusion::Success => "success",
        CheckConclusion::Failure => "failure",
        CheckConclusion::Neutral => "neutral",
        CheckConclusion::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> GitHubClient {
        GitHubClient::new(reqwest::Client::new(), base.to_string(), "tok".to_string())
    }

    fn pr_id() -> PullRequestId {
        PullRequestId {
            repo: "acme/widgets".to_string(),
            number: 7,
        }
    }

    #[tokio::test]
    async fn pull_request_meta_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Add cache",
                "body": "adds an LRU cache",
                "user": {"login": "octocat"},
                "head": {"sha": "aaa", "ref": "feature/cache"},
                "base": {"sha": "bbb", "ref": "main"},
                "draft": false,
                "additions": 120,
                "deletions": 8,
                "changed_files": 4,
                "created_at": "2026-07-01T10:00:00Z",
                "updated_at": "2026-07-01T11:00:00Z"
            })))
            .mount(&server)
            .await;

        let pr = client(&server.uri())
            .get_pull_request(&pr_id())
            .await
            .expect("meta");
        assert_eq!(pr.author_login, "octocat");
        assert_eq!(pr.head_sha, "aaa");
        assert_eq!(pr.changed_files, 4);
    }

    #[tokio::test]
    async fn missing_pr_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/7"))
            .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_pull_request(&pr_id())
            .await
            .expect_err("must fail");
        assert!(matches!(
            err,
            crate::errors::Error::Provider(ProviderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn abuse_403_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/7"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("retry-after", "11")
                    .set_body_string("You have exceeded a secondary rate limit"),
            )
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .get_pull_request(&pr_id())
            .await
            .expect_err("must fail");
        match err {
            crate::errors::Error::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, Some(11));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
