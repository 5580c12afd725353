//! One workflow run: fetch → orchestrate → persist → publish → transition.
//!
//! Checkpoints (status writes, agent-run upserts) land before their
//! side-effects; the cancellation token is observed before every external
//! call so a superseded workflow publishes nothing after cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use git_publisher::types::{CheckConclusion, CheckOutput, CheckStatus, ReviewCommentDraft};
use git_publisher::{content_hash, PublishTarget};
use orchestrator::contract::{AgentOutput, AgentOutputs, AgentRunResult};
use orchestrator::{OrchestrateRequest, TokenBudget};
use realtime::MessageType;
use storage::records::{
    AgentRunRecord, AgentRunStatus, ArtifactKind, ArtifactRecord, WorkflowRecord, WorkflowStatus,
};

use crate::errors::{EngineError, EngineResult};
use crate::{retry, Engine};

/// Drive one workflow to `AWAITING_REVIEW`, `FAILED`, or silent cancellation.
pub(crate) async fn run(engine: Arc<Engine>, workflow_id: String) {
    let workflow = match storage::workflows::get(engine.pool(), &workflow_id).await {
        Ok(wf) => wf,
        Err(e) => {
            warn!(%workflow_id, error = %e, "cannot load workflow");
            return;
        }
    };
    if workflow.status.is_terminal() || workflow.status == WorkflowStatus::AwaitingReview {
        debug!(%workflow_id, status = workflow.status.as_str(), "nothing to run");
        return;
    }

    let cancel = engine.token_for(&workflow).await;
    let mut attempt = workflow.attempt as u32;

    loop {
        match run_once(&engine, &workflow, &cancel).await {
            Ok(()) => return,
            Err(e) if e.is_transient() => {
                attempt += 1;
                if let Err(db) = storage::workflows::bump_attempt(engine.pool(), &workflow.id).await
                {
                    warn!(workflow_id = %workflow.id, error = %db, "attempt bump failed");
                }
                match retry::delay_for(attempt) {
                    Some(delay) => {
                        warn!(
                            workflow_id = %workflow.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "transient failure, backing off"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                    None => {
                        fail(&engine, &workflow, &format!("retries exhausted: {e}")).await;
                        return;
                    }
                }
            }
            Err(e) => {
                fail(&engine, &workflow, &e.to_string()).await;
                return;
            }
        }
    }
}

async fn run_once(
    engine: &Engine,
    workflow: &WorkflowRecord,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    let pool = engine.pool();
    let current = storage::workflows::get(pool, &workflow.id).await?;
    if current.status == WorkflowStatus::Pending {
        storage::workflows::set_status(pool, &workflow.id, WorkflowStatus::Running).await?;
        engine.publish_status(workflow, WorkflowStatus::Running);
    } else if current.status != WorkflowStatus::Running {
        return Ok(()); // superseded or resolved while queued
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    // ---- provider I/O -----------------------------------------------------
    let pr_id = engine.pr_id(workflow);
    let bundle = engine.publisher().client().fetch_bundle(&pr_id).await?;
    storage::workflows::set_pr_meta(
        pool,
        &workflow.id,
        &bundle.pr.base_sha,
        &bundle.pr.author_login,
    )
    .await?;
    storage::workflows::touch_checkpoint(pool, &workflow.id).await?;

    let target = PublishTarget {
        pr: pr_id,
        head_sha: workflow.head_sha.clone(),
        workflow_id: workflow.id.clone(),
    };

    // In-progress check-run, reusing a previous external id on resume.
    let check_artifact = upsert_artifact(
        pool,
        workflow,
        ArtifactKind::CheckRun,
        json!({"name": "pr-ai-review", "head_sha": workflow.head_sha}),
    )
    .await?;
    if cancel.is_cancelled() {
        return Ok(());
    }
    let check_external = engine
        .publisher()
        .publish_check_run(
            &target,
            CheckStatus::InProgress,
            None,
            &CheckOutput {
                title: "Automated review running".to_string(),
                summary: format!("workflow `{}`", workflow.id),
            },
            check_artifact.external_id.as_deref(),
        )
        .await?;
    storage::artifacts::mark_published(pool, &check_artifact.id, &check_external).await?;

    // ---- orchestration ----------------------------------------------------
    let preferences = engine.preferences().model(&workflow.repository_id).await?;
    let completed = load_succeeded_outputs(pool, &workflow.id).await?;

    let prompt_ctx = llm_service::PromptContext {
        repository: workflow.repository_id.clone(),
        pr_title: bundle.pr.title.clone(),
        language_hint: None,
        verbosity: Some(format!("{:?}", preferences.verbosity).to_uppercase()),
    };
    let ctx = Arc::new(orchestrator::AgentContext {
        workflow_id: workflow.id.clone(),
        repository_id: workflow.repository_id.clone(),
        bundle,
        llm: engine.llm(),
        preferences,
        prompt_ctx,
        budget: Arc::new(TokenBudget::new(engine.config().token_budget)),
        cancel: cancel.clone(),
    });

    let (events_tx, events_rx) = tokio::sync::mpsc::channel(64);
    engine.spawn_agent_event_pump(workflow, events_rx);

    let results = orchestrator::orchestrate(OrchestrateRequest {
        ctx,
        completed,
        global_slots: engine.agent_slots(),
        per_workflow_limit: engine.config().max_agents_per_workflow,
        events: Some(events_tx),
    })
    .await;

    persist_agent_runs(pool, &workflow.id, &results).await?;
    storage::workflows::touch_checkpoint(pool, &workflow.id).await?;
    engine.publish_event(
        workflow,
        MessageType::AnalysisComplete,
        json!({
            "agents": results
                .iter()
                .map(|r| json!({"name": r.agent_name, "status": r.status.as_str()}))
                .collect::<Vec<_>>()
        }),
    );

    if cancel.is_cancelled() {
        return Ok(());
    }

    // The workflow fails only when synthesis produced nothing at all.
    let synthesis = results.iter().find_map(|r| match &r.output {
        Some(AgentOutput::Synthesis(s)) => Some(s.clone()),
        _ => None,
    });
    let Some(synthesis) = synthesis else {
        return Err(EngineError::NotRunnable(format!(
            "synthesis produced no artifact for workflow {}",
            workflow.id
        )));
    };

    // ---- artifacts + publication -------------------------------------------
    publish_outputs(engine, workflow, &target, &results, &synthesis.markdown, cancel).await?;

    if cancel.is_cancelled() {
        return Ok(());
    }
    storage::workflows::set_status(pool, &workflow.id, WorkflowStatus::AwaitingReview).await?;
    engine.publish_status(workflow, WorkflowStatus::AwaitingReview);
    info!(workflow_id = %workflow.id, "workflow awaiting review");
    Ok(())
}

/// Persist agent results; SUCCEEDED rows keep their original output.
async fn persist_agent_runs(
    pool: &storage::DbPool,
    workflow_id: &str,
    results: &[AgentRunResult],
) -> EngineResult<()> {
    for result in results {
        let output = match &result.output {
            Some(output) => Some(serde_json::to_value(output).map_err(|e| {
                EngineError::NotRunnable(format!("unserializable agent output: {e}"))
            })?),
            None => None,
        };
        storage::agent_runs::upsert(
            pool,
            &AgentRunRecord {
                id: uuid::Uuid::new_v4().to_string(),
                workflow_id: workflow_id.to_string(),
                agent_name: result.agent_name.clone(),
                status: result.status,
                started_at: result.started_at,
                finished_at: result.finished_at,
                latency_ms: result.latency_ms.map(|v| v as i64),
                error: result.error.clone(),
                output,
            },
        )
        .await?;
    }
    Ok(())
}

/// SUCCEEDED outputs from a prior attempt, keyed by agent name.
async fn load_succeeded_outputs(
    pool: &storage::DbPool,
    workflow_id: &str,
) -> EngineResult<AgentOutputs> {
    let mut outputs = HashMap::new();
    for run in storage::agent_runs::list_succeeded(pool, workflow_id).await? {
        let Some(raw) = run.output else { continue };
        match serde_json::from_value::<AgentOutput>(raw) {
            Ok(output) => {
                outputs.insert(run.agent_name, output);
            }
            Err(e) => warn!(agent = %run.agent_name, error = %e, "stored output unreadable"),
        }
    }
    Ok(outputs)
}

async fn upsert_artifact(
    pool: &storage::DbPool,
    workflow: &WorkflowRecord,
    kind: ArtifactKind,
    payload: serde_json::Value,
) -> EngineResult<ArtifactRecord> {
    let record = ArtifactRecord {
        id: uuid::Uuid::new_v4().to_string(),
        workflow_id: workflow.id.clone(),
        kind,
        content_hash: content_hash(&payload),
        payload,
        published_at: None,
        external_id: None,
    };
    Ok(storage::artifacts::insert(pool, &record).await?)
}

/// Create artifacts for every agent output and push them to the provider.
async fn publish_outputs(
    engine: &Engine,
    workflow: &WorkflowRecord,
    target: &PublishTarget,
    results: &[AgentRunResult],
    summary_markdown: &str,
    cancel: &CancellationToken,
) -> EngineResult<()> {
    let pool = engine.pool();

    let mut review_artifacts: Vec<ArtifactRecord> = Vec::new();
    let mut drafts: Vec<ReviewCommentDraft> = Vec::new();
    let mut generated_tests = 0usize;
    let mut critical_findings = 0usize;

    for result in results {
        if result.status != AgentRunStatus::Succeeded {
            continue;
        }
        match &result.output {
            Some(AgentOutput::Intent(intent)) => {
                upsert_artifact(
                    pool,
                    workflow,
                    ArtifactKind::IntentAnalysis,
                    serde_json::to_value(intent).unwrap_or_default(),
                )
                .await?;
            }
            Some(AgentOutput::Review(review)) => {
                for adjusted in &review.findings {
                    let finding = &adjusted.finding;
                    if finding.severity == preference_learning::Severity::Critical {
                        critical_findings += 1;
                    }
                    let artifact = upsert_artifact(
                        pool,
                        workflow,
                        ArtifactKind::ReviewComment,
                        serde_json::to_value(adjusted).unwrap_or_default(),
                    )
                    .await?;
                    review_artifacts.push(artifact);

                    let mut body = finding.message.clone();
                    if let Some(fix) = &finding.quick_fix {
                        body.push_str(&format!("\n\n```suggestion\n{fix}\n```"));
                    }
                    drafts.push(ReviewCommentDraft {
                        path: finding.file.clone(),
                        line: finding.line,
                        end_line: finding.end_line,
                        body,
                    });
                }
            }
            Some(AgentOutput::Tests(tests)) => {
                for test in &tests.tests {
                    upsert_artifact(
                        pool,
                        workflow,
                        ArtifactKind::GeneratedTest,
                        serde_json::to_value(test).unwrap_or_default(),
                    )
                    .await?;
                    generated_tests += 1;
                }
            }
            Some(AgentOutput::Docs(docs)) => {
                for suggestion in &docs.suggestions {
                    upsert_artifact(
                        pool,
                        workflow,
                        ArtifactKind::DocSuggestion,
                        serde_json::to_value(suggestion).unwrap_or_default(),
                    )
                    .await?;
                }
            }
            _ => {}
        }
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    // Inline review batch.
    if !drafts.is_empty() {
        let batch_hash = content_hash(&serde_json::to_value(&drafts).unwrap_or_default());
        let external_id = engine
            .publisher()
            .publish_review_batch(target, &drafts, &batch_hash)
            .await?;
        for artifact in &review_artifacts {
            storage::artifacts::mark_published(pool, &artifact.id, &external_id).await?;
        }
        engine.publish_event(
            workflow,
            MessageType::CommentPosted,
            json!({"count": drafts.len(), "externalId": external_id}),
        );
    }
    if generated_tests > 0 {
        engine.publish_event(
            workflow,
            MessageType::TestGenerated,
            json!({"count": generated_tests}),
        );
    }

    if cancel.is_cancelled() {
        return Ok(());
    }

    // Summary comment.
    let summary_artifact = upsert_artifact(
        pool,
        workflow,
        ArtifactKind::SummaryComment,
        json!({"markdown": summary_markdown}),
    )
    .await?;
    let external_id = engine
        .publisher()
        .publish_summary_comment(target, summary_markdown, &summary_artifact.content_hash)
        .await?;
    storage::artifacts::mark_published(pool, &summary_artifact.id, &external_id).await?;

    if cancel.is_cancelled() {
        return Ok(());
    }

    // Final check-run verdict.
    let conclusion = if critical_findings > 0 {
        CheckConclusion::Neutral
    } else {
        CheckConclusion::Success
    };
    let check = storage::artifacts::list_for_workflow(pool, &workflow.id)
        .await?
        .into_iter()
        .find(|a| a.kind == ArtifactKind::CheckRun);
    engine
        .publisher()
        .publish_check_run(
            target,
            CheckStatus::Completed,
            Some(conclusion),
            &CheckOutput {
                title: format!("{} finding(s)", drafts.len()),
                summary: summary_markdown.chars().take(500).collect(),
            },
            check.as_ref().and_then(|c| c.external_id.as_deref()),
        )
        .await?;

    Ok(())
}

/// Mark the workflow failed and tell everyone (provider + subscribers).
pub(crate) async fn fail(engine: &Engine, workflow: &WorkflowRecord, reason: &str) {
    warn!(workflow_id = %workflow.id, reason, "workflow failed");
    if let Err(e) =
        storage::workflows::set_status(engine.pool(), &workflow.id, WorkflowStatus::Failed).await
    {
        warn!(workflow_id = %workflow.id, error = %e, "failed-status write failed");
    }
    engine.publish_status(workflow, WorkflowStatus::Failed);

    // Failure check-run with a short reason and correlation id.
    let target = PublishTarget {
        pr: engine.pr_id(workflow),
        head_sha: workflow.head_sha.clone(),
        workflow_id: workflow.id.clone(),
    };
    let short_reason: String = reason.chars().take(200).collect();
    if let Err(e) = engine
        .publisher()
        .publish_check_run(
            &target,
            CheckStatus::Completed,
            Some(CheckConclusion::Failure),
            &CheckOutput {
                title: "Automated review failed".to_string(),
                summary: format!("{short_reason}\n\ncorrelation id: `{}`", workflow.id),
            },
            None,
        )
        .await
    {
        warn!(workflow_id = %workflow.id, error = %e, "failure check-run not published");
    }

    engine.publish_event(
        workflow,
        MessageType::Error,
        json!({"message": short_reason, "requestId": workflow.id}),
    );
    engine.release_active(workflow).await;
}
