//! Workflow engine: drives each PR through its state machine with durable
//! checkpoints, supersession, retries, and crash-safe resumption.
//!
//! Shape:
//! - [`Engine::enqueue`] admits trigger events, enforcing one active
//!   workflow per `(repository, pr)`: same-sha events coalesce, new-sha
//!   events cancel the predecessor cooperatively and queue a successor;
//! - a dispatcher loop feeds queued workflow ids to runner tasks bounded by
//!   `MAX_CONCURRENT_WORKFLOWS`;
//! - [`Engine::resume_stale`] re-queues RUNNING workflows whose checkpoint
//!   went stale (crash recovery) plus anything still PENDING;
//! - reviewer resolution promotes `AWAITING_REVIEW → COMPLETED` and feeds
//!   the predictive-health trainer.

pub mod errors;
pub mod observation;
pub mod priority;
pub mod retry;
pub mod runner;
pub mod state;

pub use errors::{EngineError, EngineResult};
pub use priority::{score as priority_score, PriorityInput};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use git_publisher::types::PullRequestId;
use git_publisher::Publisher;
use llm_service::LlmClient;
use predictive_health::{HealthSample, HealthService};
use preference_learning::PreferenceStore;
use realtime::{EventBus, MessageType, ServerMessage};
use storage::records::{
    ArtifactKind, TriggerEventRecord, WorkflowRecord, WorkflowStatus,
};
use storage::DbPool;

/// Engine tuning knobs (environment-driven at bootstrap).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent workflow runner tasks.
    pub max_concurrent_workflows: usize,
    /// Concurrent agents inside one workflow.
    pub max_agents_per_workflow: usize,
    /// Process-wide agent slots shared across workflows.
    pub global_agent_slots: usize,
    /// Same-sha coalescing window.
    pub debounce_ms: i64,
    /// Aggregate LLM token budget per workflow.
    pub token_budget: u32,
    /// RUNNING workflows with an older checkpoint resume on startup.
    pub stale_checkpoint_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: std::thread::available_parallelism()
                .map(|p| p.get() * 2)
                .unwrap_or(8),
            max_agents_per_workflow: 4,
            global_agent_slots: 64,
            debounce_ms: 3_000,
            token_budget: 200_000,
            stale_checkpoint_ms: 10 * 60 * 1000,
        }
    }
}

/// Outcome of admitting one trigger event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new workflow was created and queued.
    Created { workflow_id: String },
    /// An active workflow for the same head sha absorbed the event.
    Coalesced { workflow_id: String },
    /// A prior workflow was cancelled; its successor was queued.
    Superseded {
        cancelled_workflow_id: String,
        workflow_id: String,
    },
}

struct ActiveEntry {
    workflow_id: String,
    head_sha: String,
    cancel: CancellationToken,
}

/// The workflow engine. One per process; cheap to share via `Arc`.
pub struct Engine {
    pool: DbPool,
    publisher: Arc<Publisher>,
    llm: Arc<LlmClient>,
    prefs: Arc<PreferenceStore>,
    health: Arc<HealthService>,
    bus: EventBus,
    cfg: EngineConfig,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Mutex<Option<mpsc::Receiver<String>>>,
    active: Mutex<HashMap<(String, i64), ActiveEntry>>,
    /// `repo#pr#sha → last_enqueue_ms` for the debounce window.
    debounce: Mutex<HashMap<String, i64>>,
    agent_slots: Arc<Semaphore>,
    worker_slots: Arc<Semaphore>,
}

impl Engine {
    pub fn new(
        pool: DbPool,
        publisher: Arc<Publisher>,
        llm: Arc<LlmClient>,
        prefs: Arc<PreferenceStore>,
        health: Arc<HealthService>,
        bus: EventBus,
        cfg: EngineConfig,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(1024);
        Self {
            pool,
            publisher,
            llm,
            prefs,
            health,
            bus,
            agent_slots: Arc::new(Semaphore::new(cfg.global_agent_slots.max(1))),
            worker_slots: Arc::new(Semaphore::new(cfg.max_concurrent_workflows.max(1))),
            cfg,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            active: Mutex::new(HashMap::new()),
            debounce: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub(crate) fn llm(&self) -> Arc<LlmClient> {
        self.llm.clone()
    }

    pub(crate) fn preferences(&self) -> &PreferenceStore {
        &self.prefs
    }

    pub(crate) fn agent_slots(&self) -> Arc<Semaphore> {
        self.agent_slots.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// The provider client, for consumers that need read-only PR data
    /// (e.g. the gateway's include-paths check).
    pub fn provider_client(&self) -> &git_publisher::ProviderClient {
        self.publisher.client()
    }

    pub(crate) fn pr_id(&self, workflow: &WorkflowRecord) -> PullRequestId {
        PullRequestId {
            repo: workflow.repository_id.clone(),
            number: workflow.pr_number as u64,
        }
    }

    /// Admit a (gateway-deduplicated) trigger event.
    ///
    /// The supersession invariant: at most one non-terminal workflow per
    /// `(repository, pr)`. A different head sha cancels the incumbent first
    /// (it reaches a terminal checkpoint before the successor is queued).
    pub async fn enqueue(&self, event: &TriggerEventRecord) -> EngineResult<EnqueueOutcome> {
        let key = (event.repository_id.clone(), event.pr_number);
        let now = storage::now_ms();

        let mut active = self.active.lock().await;

        // Crash recovery: repopulate the entry from storage if missing.
        if !active.contains_key(&key) {
            let rows =
                storage::workflows::find_active_for_pr(&self.pool, &event.repository_id, event.pr_number)
                    .await?;
            if let Some(wf) = rows.into_iter().last() {
                active.insert(
                    key.clone(),
                    ActiveEntry {
                        workflow_id: wf.id,
                        head_sha: wf.head_sha,
                        cancel: CancellationToken::new(),
                    },
                );
            }
        }

        let mut cancelled_workflow_id = None;
        if let Some(entry) = active.get(&key) {
            if entry.head_sha == event.head_sha {
                debug!(workflow_id = %entry.workflow_id, "same-sha event coalesced");
                return Ok(EnqueueOutcome::Coalesced {
                    workflow_id: entry.workflow_id.clone(),
                });
            }

            // Supersede: cancel cooperatively, checkpoint CANCELLED.
            entry.cancel.cancel();
            let old = storage::workflows::get(&self.pool, &entry.workflow_id).await?;
            if !old.status.is_terminal() {
                storage::workflows::set_status(&self.pool, &old.id, WorkflowStatus::Cancelled)
                    .await?;
                self.publish_status(&old, WorkflowStatus::Cancelled);
            }
            info!(
                cancelled = %entry.workflow_id,
                new_sha = %event.head_sha,
                "workflow superseded by new head sha"
            );
            cancelled_workflow_id = Some(entry.workflow_id.clone());
            active.remove(&key);
        } else {
            // Same-sha debounce against a workflow that already finished.
            let debounce_key = format!(
                "{}#{}#{}",
                event.repository_id, event.pr_number, event.head_sha
            );
            let mut debounce = self.debounce.lock().await;
            debounce.retain(|_, at| now - *at <= self.cfg.debounce_ms);
            if let Some(last) = debounce.get(&debounce_key) {
                if now - last <= self.cfg.debounce_ms {
                    debug!(%debounce_key, "event inside debounce window, dropped");
                    return Ok(EnqueueOutcome::Coalesced {
                        workflow_id: String::new(),
                    });
                }
            }
            debounce.insert(debounce_key, now);
        }

        let workflow = WorkflowRecord {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: event.repository_id.clone(),
            pr_number: event.pr_number,
            head_sha: event.head_sha.clone(),
            base_sha: String::new(),
            author_login: String::new(),
            status: WorkflowStatus::Pending,
            attempt: 0,
            trigger_event_id: event.delivery_id.clone(),
            created_at: now,
            started_at: None,
            completed_at: None,
            checkpoint_at: now,
        };
        storage::workflows::insert(&self.pool, &workflow).await?;
        active.insert(
            key,
            ActiveEntry {
                workflow_id: workflow.id.clone(),
                head_sha: workflow.head_sha.clone(),
                cancel: CancellationToken::new(),
            },
        );
        drop(active);

        self.queue_tx
            .send(workflow.id.clone())
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        self.publish_status(&workflow, WorkflowStatus::Pending);
        info!(workflow_id = %workflow.id, sha = %workflow.head_sha, "workflow queued");

        Ok(match cancelled_workflow_id {
            Some(cancelled_workflow_id) => EnqueueOutcome::Superseded {
                cancelled_workflow_id,
                workflow_id: workflow.id,
            },
            None => EnqueueOutcome::Created {
                workflow_id: workflow.id,
            },
        })
    }

    /// Start the dispatcher: pops queued workflow ids and runs them on the
    /// bounded worker pool. Call once.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = self;
        tokio::spawn(async move {
            let mut rx = engine
                .queue_rx
                .lock()
                .await
                .take()
                .expect("engine started twice");
            while let Some(workflow_id) = rx.recv().await {
                let permit = engine
                    .worker_slots
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker semaphore open");
                let engine = engine.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    runner::run(engine, workflow_id).await;
                });
            }
        })
    }

    /// Crash-safe resumption: re-queue PENDING workflows and RUNNING ones
    /// whose last checkpoint is older than the staleness cutoff.
    pub async fn resume_stale(&self) -> EngineResult<usize> {
        let cutoff = storage::now_ms() - self.cfg.stale_checkpoint_ms;
        let mut requeued = 0;

        let stale = storage::workflows::find_stale_running(&self.pool, cutoff).await?;
        let pending = storage::workflows::find_pending(&self.pool).await?;
        for wf in stale.into_iter().chain(pending) {
            let key = (wf.repository_id.clone(), wf.pr_number);
            {
                let mut active = self.active.lock().await;
                active.entry(key).or_insert_with(|| ActiveEntry {
                    workflow_id: wf.id.clone(),
                    head_sha: wf.head_sha.clone(),
                    cancel: CancellationToken::new(),
                });
            }
            self.queue_tx
                .send(wf.id.clone())
                .await
                .map_err(|_| EngineError::QueueClosed)?;
            info!(workflow_id = %wf.id, status = wf.status.as_str(), "workflow re-queued on startup");
            requeued += 1;
        }
        Ok(requeued)
    }

    /// A reviewer decision landed on an artifact; resolve the workflow if it
    /// was a decision on the summary, or if every published review comment
    /// now has one.
    pub async fn decision_recorded(
        &self,
        workflow_id: &str,
        comment_artifact_id: &str,
    ) -> EngineResult<bool> {
        let artifact = storage::artifacts::get(&self.pool, comment_artifact_id).await?;
        let resolved = if artifact.kind == ArtifactKind::SummaryComment {
            true
        } else {
            let artifacts = storage::artifacts::list_for_workflow(&self.pool, workflow_id).await?;
            let decisions = storage::decisions::list_for_workflow(&self.pool, workflow_id).await?;
            let decided: std::collections::HashSet<&str> = decisions
                .iter()
                .map(|d| d.comment_artifact_id.as_str())
                .collect();
            artifacts
                .iter()
                .filter(|a| a.kind == ArtifactKind::ReviewComment)
                .all(|a| decided.contains(a.id.as_str()))
        };

        if resolved {
            self.complete(workflow_id).await?;
        }
        Ok(resolved)
    }

    /// `AWAITING_REVIEW → COMPLETED`, then feed predictive-health.
    pub async fn complete(&self, workflow_id: &str) -> EngineResult<()> {
        let wf = storage::workflows::get(&self.pool, workflow_id).await?;
        if !state::can_transition(wf.status, WorkflowStatus::Completed) {
            return Ok(()); // idempotent no-op for repeat decisions
        }
        storage::workflows::set_status(&self.pool, workflow_id, WorkflowStatus::Completed).await?;
        let wf = storage::workflows::get(&self.pool, workflow_id).await?;
        self.publish_status(&wf, WorkflowStatus::Completed);
        self.release_active(&wf).await;

        // Out-of-band learning loop.
        let runs = storage::agent_runs::list_for_workflow(&self.pool, workflow_id).await?;
        let obs = observation::from_runs(&wf, &runs);
        let outcome_hours = ((wf.completed_at.unwrap_or_else(storage::now_ms) - wf.created_at)
            .max(0)) as f64
            / 3_600_000.0;
        self.health
            .record_sample(
                &wf.repository_id,
                &HealthSample {
                    workflow_id: wf.id.clone(),
                    observation: obs,
                    outcome_hours,
                },
            )
            .await?;
        if let Err(e) = self.health.train_repo(&wf.repository_id).await {
            warn!(repository_id = %wf.repository_id, error = %e, "health training failed");
        }
        info!(workflow_id, "workflow completed");
        Ok(())
    }

    pub(crate) async fn token_for(&self, workflow: &WorkflowRecord) -> CancellationToken {
        let key = (workflow.repository_id.clone(), workflow.pr_number);
        let mut active = self.active.lock().await;
        active
            .entry(key)
            .or_insert_with(|| ActiveEntry {
                workflow_id: workflow.id.clone(),
                head_sha: workflow.head_sha.clone(),
                cancel: CancellationToken::new(),
            })
            .cancel
            .clone()
    }

    pub(crate) async fn release_active(&self, workflow: &WorkflowRecord) {
        let key = (workflow.repository_id.clone(), workflow.pr_number);
        let mut active = self.active.lock().await;
        if let Some(entry) = active.get(&key) {
            if entry.workflow_id == workflow.id {
                active.remove(&key);
            }
        }
    }

    /// Fan a status transition out to subscribers.
    pub(crate) fn publish_status(&self, workflow: &WorkflowRecord, status: WorkflowStatus) {
        self.bus.publish_repo(
            &workflow.repository_id,
            ServerMessage::for_workflow(
                MessageType::WorkflowUpdate,
                workflow.id.clone(),
                json!({
                    "status": status.as_str(),
                    "prNumber": workflow.pr_number,
                    "headSha": workflow.head_sha,
                }),
            ),
        );
    }

    pub(crate) fn publish_event(
        &self,
        workflow: &WorkflowRecord,
        kind: MessageType,
        data: serde_json::Value,
    ) {
        self.bus.publish_repo(
            &workflow.repository_id,
            ServerMessage::for_workflow(kind, workflow.id.clone(), data),
        );
    }

    /// Stream per-agent progress to subscribers while a workflow runs.
    pub(crate) fn spawn_agent_event_pump(
        &self,
        workflow: &WorkflowRecord,
        mut rx: mpsc::Receiver<orchestrator::AgentEvent>,
    ) {
        let bus = self.bus.clone();
        let repository_id = workflow.repository_id.clone();
        let workflow_id = workflow.id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let data = match &event {
                    orchestrator::AgentEvent::Started { agent_name } => {
                        json!({"agent": agent_name, "phase": "started"})
                    }
                    orchestrator::AgentEvent::Finished { agent_name, status } => {
                        json!({"agent": agent_name, "phase": "finished", "status": status.as_str()})
                    }
                };
                bus.publish_repo(
                    &repository_id,
                    ServerMessage::for_workflow(
                        MessageType::WorkflowUpdate,
                        workflow_id.clone(),
                        data,
                    ),
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_publisher::types::ProviderKind;
    use git_publisher::{InstallationLimiter, ProviderClient, ProviderConfig, PublishConfig};
    use llm_service::LlmModelConfig;
    use storage::records::TriggerAction;

    async fn engine_with(base_api: &str) -> Arc<Engine> {
        let pool = storage::init_test_db().await.expect("init db");
        let client = ProviderClient::from_config(ProviderConfig {
            kind: ProviderKind::GitHub,
            base_api: base_api.to_string(),
            token: "tok".to_string(),
            installation_id: "inst-1".to_string(),
        })
        .expect("client");
        let publisher = Arc::new(Publisher::new(
            client,
            Arc::new(InstallationLimiter::new()),
            "inst-1".to_string(),
            PublishConfig::default(),
        ));
        let llm = Arc::new(LlmClient::from_config(LlmModelConfig::mock()).expect("llm"));
        let prefs = Arc::new(PreferenceStore::new(pool.clone()));
        let health = Arc::new(HealthService::new(pool.clone()));
        Arc::new(Engine::new(
            pool,
            publisher,
            llm,
            prefs,
            health,
            EventBus::local(256),
            EngineConfig::default(),
        ))
    }

    fn event(delivery: &str, sha: &str) -> TriggerEventRecord {
        TriggerEventRecord {
            delivery_id: delivery.to_string(),
            action: TriggerAction::Synchronize,
            repository_id: "acme/widgets".to_string(),
            pr_number: 7,
            head_sha: sha.to_string(),
            received_at: storage::now_ms(),
        }
    }

    #[tokio::test]
    async fn same_sha_events_coalesce() {
        let engine = engine_with("http://127.0.0.1:1").await;

        let first = engine.enqueue(&event("d1", "sha-a")).await.expect("first");
        let EnqueueOutcome::Created { workflow_id } = first else {
            panic!("expected Created, got {first:?}");
        };

        let second = engine.enqueue(&event("d2", "sha-a")).await.expect("second");
        assert_eq!(
            second,
            EnqueueOutcome::Coalesced {
                workflow_id: workflow_id.clone()
            }
        );

        let active = storage::workflows::find_active_for_pr(engine.pool(), "acme/widgets", 7)
            .await
            .expect("query");
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn new_sha_supersedes_and_cancels() {
        let engine = engine_with("http://127.0.0.1:1").await;

        let first = engine.enqueue(&event("d1", "sha-a")).await.expect("first");
        let EnqueueOutcome::Created { workflow_id: w1 } = first else {
            panic!("expected Created");
        };

        let second = engine.enqueue(&event("d2", "sha-b")).await.expect("second");
        let EnqueueOutcome::Superseded {
            cancelled_workflow_id,
            workflow_id: w2,
        } = second
        else {
            panic!("expected Superseded, got {second:?}");
        };
        assert_eq!(cancelled_workflow_id, w1);
        assert_ne!(w1, w2);

        let old = storage::workflows::get(engine.pool(), &w1).await.expect("w1");
        assert_eq!(old.status, WorkflowStatus::Cancelled);
        let new = storage::workflows::get(engine.pool(), &w2).await.expect("w2");
        assert_eq!(new.status, WorkflowStatus::Pending);

        // Exactly one active workflow remains for the PR.
        let active = storage::workflows::find_active_for_pr(engine.pool(), "acme/widgets", 7)
            .await
            .expect("query");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, w2);
    }

    #[tokio::test]
    async fn priority_uses_attempt_counter() {
        // Smoke-check the glue between workflow rows and the score.
        let input = PriorityInput {
            has_critical_findings: true,
            has_high_findings: false,
            author_is_maintainer: false,
            wait_minutes: 10,
            failed_attempts: 2,
        };
        assert_eq!(priority_score(&input), 100 + 50 + 10 - 10);
    }
}
