//! Agent orchestrator: runs the fixed DAG under bounded concurrency,
//! per-agent timeouts, and a workflow token budget.
//!
//! Scheduling is greedy: an agent starts as soon as every declared
//! predecessor is terminal, siblings run in parallel, and concurrency is
//! bounded by a per-workflow semaphore plus a process-wide semaphore shared
//! across workflows.
//!
//! Error policy:
//! - a FAILED/TIMEOUT predecessor cascades SKIPPED to dependents;
//! - `synthesis` is best-effort and always runs once `review` is terminal;
//! - non-critical agents are SKIPPED once the token budget is exhausted;
//! - SUCCEEDED outputs handed in via `completed` are reused, not re-run.

pub mod agents;
pub mod budget;
pub mod contract;
pub mod dag;

pub use budget::TokenBudget;
pub use contract::{
    AgentContext, AgentError, AgentEvent, AgentOutput, AgentOutputs, AgentResult, AgentRunResult,
    AnalysisOutput, ContextOutput, DocsOutput, IntentOutput, ReviewOutput, RiskLevel, RiskOutput,
    SynthesisOutput, TestsOutput,
};
pub use dag::{descriptor, topo_order, AgentDescriptor, REGISTRY};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use storage::records::AgentRunStatus;

/// Everything one orchestration needs.
pub struct OrchestrateRequest {
    pub ctx: Arc<AgentContext>,
    /// SUCCEEDED outputs from a prior attempt (resume path); reused as-is.
    pub completed: AgentOutputs,
    /// Process-wide agent slots, shared across workflows.
    pub global_slots: Arc<Semaphore>,
    /// Max agents running concurrently inside this workflow.
    pub per_workflow_limit: usize,
    /// Progress events for the realtime layer.
    pub events: Option<mpsc::Sender<AgentEvent>>,
}

/// Run the DAG to completion and return one result per agent, in
/// topological order.
pub async fn orchestrate(req: OrchestrateRequest) -> Vec<AgentRunResult> {
    let t0 = Instant::now();
    let per_workflow = Arc::new(Semaphore::new(req.per_workflow_limit.max(1)));

    let mut results: HashMap<String, AgentRunResult> = HashMap::new();
    let mut outputs: AgentOutputs = HashMap::new();

    // Seed reused outputs from the prior attempt.
    for (name, output) in req.completed {
        debug!(agent = %name, "reusing prior SUCCEEDED output");
        results.insert(
            name.clone(),
            AgentRunResult {
                agent_name: name.clone(),
                status: AgentRunStatus::Succeeded,
                output: Some(output.clone()),
                error: None,
                latency_ms: None,
                started_at: None,
                finished_at: None,
            },
        );
        outputs.insert(name, output);
    }

    let mut running: JoinSet<(String, AgentRunResult, Option<AgentOutput>)> = JoinSet::new();
    let mut in_flight: Vec<String> = Vec::new();

    loop {
        // Start everything that became ready.
        for desc in dag::REGISTRY {
            let name = desc.name;
            if results.contains_key(name) || in_flight.iter().any(|n| n == name) {
                continue;
            }
            let deps_terminal = desc
                .deps
                .iter()
                .all(|dep| results.contains_key(*dep));
            if !deps_terminal {
                continue;
            }

            if let Some(reason) = skip_reason(desc, &results, &req.ctx) {
                debug!(agent = name, reason = %reason, "agent skipped");
                results.insert(name.to_string(), AgentRunResult::skipped(name, &reason));
                emit(&req.events, AgentEvent::Finished {
                    agent_name: name.to_string(),
                    status: AgentRunStatus::Skipped,
                })
                .await;
                continue;
            }

            let ctx = req.ctx.clone();
            let inputs: AgentOutputs = outputs.clone();
            let per_workflow = per_workflow.clone();
            let global = req.global_slots.clone();
            let timeout = desc.timeout;
            let agent_name = name.to_string();

            emit(&req.events, AgentEvent::Started {
                agent_name: agent_name.clone(),
            })
            .await;

            in_flight.push(agent_name.clone());
            running.spawn(async move {
                let _local = per_workflow.acquire_owned().await.expect("semaphore open");
                let _global = global.acquire_owned().await.expect("semaphore open");

                let started_at = storage::now_ms();
                let t_agent = Instant::now();
                let outcome =
                    tokio::time::timeout(timeout, agents::run(&agent_name, &ctx, &inputs)).await;
                let latency_ms = t_agent.elapsed().as_millis() as u64;
                let finished_at = storage::now_ms();

                let (status, output, error) = match outcome {
                    Ok(Ok(output)) => (AgentRunStatus::Succeeded, Some(output), None),
                    Ok(Err(contract::AgentError::Cancelled)) => (
                        AgentRunStatus::Skipped,
                        None,
                        Some("cancelled".to_string()),
                    ),
                    Ok(Err(e)) => (AgentRunStatus::Failed, None, Some(e.to_string())),
                    Err(_) => (
                        AgentRunStatus::Timeout,
                        None,
                        Some(format!("timed out after {} s", timeout.as_secs())),
                    ),
                };

                let result = AgentRunResult {
                    agent_name: agent_name.clone(),
                    status,
                    output: output.clone(),
                    error,
                    latency_ms: Some(latency_ms),
                    started_at: Some(started_at),
                    finished_at: Some(finished_at),
                };
                (agent_name, result, output)
            });
        }

        // Drain one completion (or finish).
        let Some(joined) = running.join_next().await else {
            break;
        };
        match joined {
            Ok((name, result, output)) => {
                in_flight.retain(|n| n != &name);
                match result.status {
                    AgentRunStatus::Succeeded => {
                        debug!(agent = %name, latency_ms = ?result.latency_ms, "agent succeeded")
                    }
                    status => warn!(agent = %name, ?status, error = ?result.error, "agent did not succeed"),
                }
                emit(&req.events, AgentEvent::Finished {
                    agent_name: name.clone(),
                    status: result.status,
                })
                .await;
                if let Some(output) = output {
                    outputs.insert(name.clone(), output);
                }
                results.insert(name, result);
            }
            Err(join_error) => {
                // A panicking agent must not take the workflow down.
                warn!(error = %join_error, "agent task panicked");
                if let Some(name) = in_flight.pop() {
                    results.insert(
                        name.clone(),
                        AgentRunResult {
                            agent_name: name,
                            status: AgentRunStatus::Failed,
                            output: None,
                            error: Some("agent task panicked".to_string()),
                            latency_ms: None,
                            started_at: None,
                            finished_at: None,
                        },
                    );
                }
            }
        }
    }

    info!(
        workflow_id = %req.ctx.workflow_id,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        tokens_used = req.ctx.budget.used(),
        "orchestration finished"
    );

    dag::topo_order()
        .filter_map(|name| results.remove(name))
        .collect()
}

/// Decide whether an agent must be skipped instead of started.
fn skip_reason(
    desc: &dag::AgentDescriptor,
    results: &HashMap<String, AgentRunResult>,
    ctx: &AgentContext,
) -> Option<String> {
    if ctx.cancel.is_cancelled() {
        return Some("workflow cancelled".to_string());
    }

    // Budget gate for non-critical agents.
    if !desc.critical && ctx.budget.exhausted() {
        return Some(format!(
            "token budget exhausted ({} / {})",
            ctx.budget.used(),
            ctx.budget.limit()
        ));
    }

    if desc.best_effort {
        // Synthesis runs with whatever subset succeeded.
        return None;
    }

    for dep in desc.deps {
        match results.get(*dep).map(|r| r.status) {
            Some(AgentRunStatus::Succeeded) => {}
            Some(AgentRunStatus::Skipped) => {
                return Some(format!("predecessor {dep} was skipped"));
            }
            Some(AgentRunStatus::Failed) | Some(AgentRunStatus::Timeout) => {
                return Some(format!("predecessor {dep} did not succeed"));
            }
            _ => return Some(format!("predecessor {dep} missing")),
        }
    }
    None
}

async fn emit(events: &Option<mpsc::Sender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
