//! Merge-readiness gating.
//!
//! [`evaluate`] is a pure function over gate inputs; [`assess`] assembles
//! those inputs live from the provider (combined status, check-runs, branch
//! comparison). Approval counts and conflict flags come from the caller;
//! they are review-state, not commit-state.

use serde::{Deserialize, Serialize};

use crate::client::ProviderClient;
use crate::errors::GitResult;
use crate::types::PullRequestId;

/// Inputs for the merge-ready check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MergeReadyInput {
    pub checks_pass: bool,
    pub approvals_count: u32,
    pub required_approvals: u32,
    pub is_up_to_date: bool,
    pub has_conflicts: bool,
}

/// Verdict with one reason per failed gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReadyReport {
    pub ready: bool,
    pub reasons: Vec<String>,
}

/// Evaluate all gates; `ready` iff every gate passes.
pub fn evaluate(input: &MergeReadyInput) -> MergeReadyReport {
    let mut reasons = Vec::new();

    if !input.checks_pass {
        reasons.push("required checks are failing".to_string());
    }
    if input.approvals_count < input.required_approvals {
        reasons.push(format!(
            "needs {} more approval(s)",
            input.required_approvals - input.approvals_count
        ));
    }
    if !input.is_up_to_date {
        reasons.push("branch is behind the base".to_string());
    }
    if input.has_conflicts {
        reasons.push("merge conflicts must be resolved".to_string());
    }

    MergeReadyReport {
        ready: reasons.is_empty(),
        reasons,
    }
}

/// Fetch commit-state gates from the provider and evaluate.
pub async fn assess(
    client: &ProviderClient,
    id: &PullRequestId,
    approvals_count: u32,
    required_approvals: u32,
    has_conflicts: bool,
) -> GitResult<MergeReadyReport> {
    let pr = client.get_pull_request(id).await?;

    let combined = client.get_combined_status(id, &pr.head_sha).await?;
    let check_runs = client.get_check_runs(id, &pr.head_sha).await?;
    let checks_pass = combined.state != "failure"
        && !check_runs
            .iter()
            .any(|c| c.conclusion.as_deref() == Some("failure"));

    let comparison = client
        .compare_branches(id, &pr.base_ref, &pr.head_ref)
        .await?;
    let is_up_to_date = comparison.behind_by == 0;

    Ok(evaluate(&MergeReadyInput {
        checks_pass,
        approvals_count,
        required_approvals,
        is_up_to_date,
        has_conflicts,
    }))
}
