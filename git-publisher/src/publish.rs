//! Publisher: emits check-runs, inline review batches, and summary comments.
//!
//! Idempotency: every posted body carries a hidden HTML marker embedding the
//! deterministic artifact key `{workflow_id, kind, content_hash}`. Existing
//! markers are loaded before posting; a key hit returns the original
//! external id instead of duplicating.
//!
//! Retries: transient provider failures (5xx, timeouts, rate limits) back
//! off with jitter up to five attempts; `Retry-After` wins when present.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::client::ProviderClient;
use crate::errors::{Error, GitResult};
use crate::rate_limit::InstallationLimiter;
use crate::types::{
    CheckConclusion, CheckOutput, CheckStatus, PullRequestId, ReviewCommentDraft,
};

/// Marker prefix embedded into posted comment bodies.
/// Example: `<!-- prai:key=wf-1/summary_comment/ab12cd34 -->`
const MARKER_PREFIX: &str = "<!-- prai:key=";
const MARKER_SUFFIX: &str = " -->";

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub max_attempts: u32,
    /// Log instead of POSTing; used by tests and staging.
    pub dry_run: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            dry_run: false,
        }
    }
}

/// Where an artifact lands.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub pr: PullRequestId,
    pub head_sha: String,
    pub workflow_id: String,
}

/// Deterministic idempotency key for one artifact.
pub fn artifact_key(workflow_id: &str, kind: &str, content_hash: &str) -> String {
    format!("{workflow_id}/{kind}/{content_hash}")
}

/// Marker comment for an artifact key.
pub fn make_marker(key: &str) -> String {
    format!("{MARKER_PREFIX}{key}{MARKER_SUFFIX}")
}

/// Extract artifact keys from existing comment bodies.
pub fn extract_marker(body: &str) -> Option<&str> {
    let start = body.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(MARKER_SUFFIX)?;
    Some(rest[..end].trim())
}

/// Provider publisher bound to one installation.
pub struct Publisher {
    client: ProviderClient,
    limiter: Arc<InstallationLimiter>,
    installation_id: String,
    cfg: PublishConfig,
}

impl Publisher {
    pub fn new(
        client: ProviderClient,
        limiter: Arc<InstallationLimiter>,
        installation_id: String,
        cfg: PublishConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            installation_id,
            cfg,
        }
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Create or update the review check-run for a workflow.
    ///
    /// `existing_external_id` routes to update so re-publishes never create
    /// a second check-run for the same workflow.
    pub async fn publish_check_run(
        &self,
        target: &PublishTarget,
        status: CheckStatus,
        conclusion: Option<CheckConclusion>,
        output: &CheckOutput,
        existing_external_id: Option<&str>,
    ) -> GitResult<String> {
        if self.cfg.dry_run {
            info!(workflow_id = %target.workflow_id, "dry-run: check-run suppressed");
            return Ok("dry-run".to_string());
        }
        let this = self;
        self.with_retry(move || async move {
            this.limiter.acquire(&this.installation_id).await;
            match existing_external_id {
                Some(id) => {
                    this.client
                        .update_check_run(&target.pr, id, status, conclusion, output)
                        .await
                }
                None => {
                    this.client
                        .create_check_run(
                            &target.pr,
                            "pr-ai-review",
                            &target.head_sha,
                            status,
                            conclusion,
                            output,
                        )
                        .await
                }
            }
        })
        .await
    }

    /// Publish a batch of inline comments as one review.
    ///
    /// The batch body carries the idempotency marker; when a comment with the
    /// same key already exists the original review's external id is returned.
    pub async fn publish_review_batch(
        &self,
        target: &PublishTarget,
        comments: &[ReviewCommentDraft],
        content_hash: &str,
    ) -> GitResult<String> {
        if comments.is_empty() {
            return Err(Error::Validation("empty review batch".into()));
        }
        let key = artifact_key(&target.workflow_id, "review_comment", content_hash);

        if let Some(existing_id) = self.find_existing(&target.pr, &key).await? {
            debug!(%key, %existing_id, "review batch already published");
            return Ok(existing_id);
        }

        if self.cfg.dry_run {
            info!(workflow_id = %target.workflow_id, count = comments.len(), "dry-run: review batch suppressed");
            return Ok("dry-run".to_string());
        }

        let body = format!(
            "Automated review: {} finding(s).\n\n{}",
            comments.len(),
            make_marker(&key)
        );
        let this = self;
        let body = &body;
        self.with_retry(move || async move {
            this.limiter.acquire(&this.installation_id).await;
            this.client
                .create_review(&target.pr, &target.head_sha, body, comments)
                .await
        })
        .await
    }

    /// Publish (or reuse) the summary comment.
    pub async fn publish_summary_comment(
        &self,
        target: &PublishTarget,
        markdown: &str,
        content_hash: &str,
    ) -> GitResult<String> {
        let key = artifact_key(&target.workflow_id, "summary_comment", content_hash);

        if let Some(existing_id) = self.find_existing(&target.pr, &key).await? {
            debug!(%key, %existing_id, "summary already published");
            return Ok(existing_id);
        }

        if self.cfg.dry_run {
            info!(workflow_id = %target.workflow_id, "dry-run: summary suppressed");
            return Ok("dry-run".to_string());
        }

        let body = format!("{markdown}\n\n{}", make_marker(&key));
        let this = self;
        let body = &body;
        self.with_retry(move || async move {
            this.limiter.acquire(&this.installation_id).await;
            this.client.create_issue_comment(&target.pr, body).await
        })
        .await
    }

    /// Ask the provider to request reviews from `logins`.
    pub async fn request_reviewers(
        &self,
        target: &PublishTarget,
        logins: &[String],
    ) -> GitResult<()> {
        if logins.is_empty() || self.cfg.dry_run {
            return Ok(());
        }
        let this = self;
        self.with_retry(move || async move {
            this.limiter.acquire(&this.installation_id).await;
            this.client.request_reviewers(&target.pr, logins).await?;
            Ok("ok".to_string())
        })
        .await
        .map(|_| ())
    }

    /// Scan existing PR comments for an artifact key; returns the comment's
    /// external id on a hit.
    async fn find_existing(
        &self,
        pr: &PullRequestId,
        key: &str,
    ) -> GitResult<Option<String>> {
        self.limiter.acquire(&self.installation_id).await;
        let comments = self.client.list_issue_comments(pr).await?;
        let index: HashMap<&str, &str> = comments
            .iter()
            .filter_map(|(id, body)| extract_marker(body).map(|k| (k, id.as_str())))
            .collect();
        Ok(index.get(key).map(|id| id.to_string()))
    }

    async fn with_retry<F, Fut>(&self, mut op: F) -> GitResult<String>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = GitResult<String>>,
    {
        let mut attempt = 0u32;
        let mut delay = Duration::from_secs(1);
        loop {
            attempt += 1;
            match op().await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && attempt < self.cfg.max_attempts => {
                    let base = match &e {
                        Error::Provider(p) => p
                            .retry_after_secs()
                            .map(Duration::from_secs)
                            .unwrap_or(delay),
                        _ => delay,
                    };
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    let wait = base + jitter;
                    warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_round_trip() {
        let key = artifact_key("wf-1", "summary_comment", "ab12cd34");
        let marker = make_marker(&key);
        let body = format!("## Summary\n\ndetails\n\n{marker}");
        assert_eq!(extract_marker(&body), Some(key.as_str()));
    }

    #[test]
    fn extract_ignores_bodies_without_marker() {
        assert_eq!(extract_marker("plain comment"), None);
        assert_eq!(extract_marker("<!-- other:key=x -->"), None);
    }

    #[test]
    fn artifact_keys_are_deterministic() {
        let a = artifact_key("wf-1", "review_comment", "h1");
        let b = artifact_key("wf-1", "review_comment", "h1");
        let c = artifact_key("wf-1", "review_comment", "h2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
