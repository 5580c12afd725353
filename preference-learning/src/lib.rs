//! Preference-learning store.
//!
//! Records reviewer decisions, folds them into per-repository models via
//! bounded EMA updates, and filters review findings through the learned
//! weights before publication.
//!
//! Concurrency: the in-process cache is read-heavy. Models are updated
//! copy-on-write under a per-repo mutex; readers clone an `Arc` and never
//! block writers. Persistence is append-only (audit history); the loader
//! picks the latest row.

pub mod adjust;
pub mod finding;
pub mod model;

pub use adjust::{adjust, AdjustedFinding, SUPPRESS_BELOW};
pub use finding::{has_line_overlap, DecisionContext, Finding, Severity};
pub use model::{RepoPreferenceModel, RuleAction, TeamRule, Verbosity};

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use storage::records::DecisionRecord;
use storage::{DbPool, StorageError};

/// Errors from the preference store.
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid decision context: {0}")]
    InvalidContext(String),
}

pub type PreferenceResult<T> = Result<T, PreferenceError>;

/// Process-wide preference store.
pub struct PreferenceStore {
    pool: DbPool,
    cache: RwLock<HashMap<String, Arc<RepoPreferenceModel>>>,
    /// One writer at a time per repository; the lock never spans storage
    /// reads done by `model()`.
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PreferenceStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Latest model for a repository; lazily loaded and cached.
    pub async fn model(&self, repository_id: &str) -> PreferenceResult<Arc<RepoPreferenceModel>> {
        if let Some(model) = self.cache.read().await.get(repository_id) {
            return Ok(model.clone());
        }

        let loaded = match storage::preferences::latest_for_repo(&self.pool, repository_id).await? {
            Some((_version, payload)) => serde_json::from_value(payload)
                .map_err(|e| PreferenceError::InvalidContext(format!("stored model: {e}")))?,
            None => RepoPreferenceModel::new(repository_id),
        };
        let model = Arc::new(loaded);
        self.cache
            .write()
            .await
            .insert(repository_id.to_string(), model.clone());
        debug!(repository_id, version = model.version, "preference model loaded");
        Ok(model)
    }

    /// Persist a reviewer decision and fold it into the repo model.
    pub async fn record(&self, decision: &DecisionRecord) -> PreferenceResult<()> {
        let context: DecisionContext = serde_json::from_value(decision.context.clone())
            .map_err(|e| PreferenceError::InvalidContext(e.to_string()))?;

        storage::decisions::insert(&self.pool, decision).await?;

        let lock = self.write_lock_for(&decision.repository_id).await;
        let _guard = lock.lock().await;

        // Copy-on-write: readers keep the old Arc until the swap below.
        let current = self.model(&decision.repository_id).await?;
        let mut updated = (*current).clone();
        updated.apply_decision(decision.action, &context, decision.feedback.as_deref());

        let payload = serde_json::to_value(&updated)
            .map_err(|e| PreferenceError::InvalidContext(format!("serialize model: {e}")))?;
        storage::preferences::append_model(
            &self.pool,
            &decision.repository_id,
            updated.version,
            &payload,
        )
        .await?;

        info!(
            repository_id = %decision.repository_id,
            version = updated.version,
            data_points = updated.data_points,
            "preference model updated"
        );
        self.cache
            .write()
            .await
            .insert(decision.repository_id.clone(), Arc::new(updated));
        Ok(())
    }

    /// Apply the repo model to a finding before publication.
    pub async fn adjust(
        &self,
        repository_id: &str,
        finding: &Finding,
    ) -> PreferenceResult<AdjustedFinding> {
        let model = self.model(repository_id).await?;
        Ok(adjust::adjust(&model, finding))
    }

    /// Replace the custom rules / verbosity for a repository (admin PATCH).
    pub async fn update_settings(
        &self,
        repository_id: &str,
        custom_rules: Option<Vec<TeamRule>>,
        verbosity: Option<Verbosity>,
    ) -> PreferenceResult<Arc<RepoPreferenceModel>> {
        let lock = self.write_lock_for(repository_id).await;
        let _guard = lock.lock().await;

        let current = self.model(repository_id).await?;
        let mut updated = (*current).clone();
        if let Some(rules) = custom_rules {
            updated.custom_rules = rules;
        }
        if let Some(verbosity) = verbosity {
            updated.verbosity = verbosity;
        }
        updated.version += 1;

        let payload = serde_json::to_value(&updated)
            .map_err(|e| PreferenceError::InvalidContext(format!("serialize model: {e}")))?;
        storage::preferences::append_model(&self.pool, repository_id, updated.version, &payload)
            .await?;

        let model = Arc::new(updated);
        self.cache
            .write()
            .await
            .insert(repository_id.to_string(), model.clone());
        Ok(model)
    }

    async fn write_lock_for(&self, repository_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(repository_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use storage::records::DecisionAction;

    fn decision(id: &str, action: DecisionAction, feedback: Option<&str>) -> DecisionRecord {
        DecisionRecord {
            id: id.to_string(),
            repository_id: "acme/widgets".to_string(),
            workflow_id: "w1".to_string(),
            comment_artifact_id: "a1".to_string(),
            reviewer_id: "alice".to_string(),
            action,
            context: json!({
                "file": "src/lib.rs",
                "line": 10,
                "category": "STYLE",
                "severity": "LOW",
                "snippet": "Prefer iterator adapters over manual loops",
                "language": "rust"
            }),
            feedback: feedback.map(str::to_string),
            created_at: storage::now_ms(),
        }
    }

    #[tokio::test]
    async fn record_updates_and_persists_model() {
        let pool = storage::init_test_db().await.expect("init db");
        let store = PreferenceStore::new(pool.clone());

        for i in 0..20 {
            store
                .record(&decision(
                    &format!("d{i}"),
                    DecisionAction::Dismissed,
                    None,
                ))
                .await
                .expect("record");
        }

        let model = store.model("acme/widgets").await.expect("model");
        assert_eq!(model.data_points, 20);
        assert!(model.acceptance_for("STYLE|LOW") < 0.37);

        // A fresh store sees the persisted state (cache-independent).
        let fresh = PreferenceStore::new(pool);
        let reloaded = fresh.model("acme/widgets").await.expect("reload");
        assert_eq!(reloaded.version, model.version);
    }

    #[tokio::test]
    async fn adjust_uses_learned_state() {
        let pool = storage::init_test_db().await.expect("init db");
        let store = PreferenceStore::new(pool);

        for i in 0..20 {
            store
                .record(&decision(
                    &format!("d{i}"),
                    DecisionAction::Dismissed,
                    None,
                ))
                .await
                .expect("record");
        }

        let finding = Finding {
            file: "src/lib.rs".to_string(),
            line: 10,
            end_line: None,
            severity: Severity::Low,
            category: "style".to_string(),
            message: "Some stylistic nit".to_string(),
            quick_fix: None,
            confidence: 0.8,
        };
        let adjusted = store.adjust("acme/widgets", &finding).await.expect("adjust");
        assert!(adjusted.finding.confidence < 0.8);
    }

    #[tokio::test]
    async fn unknown_repo_yields_fresh_model() {
        let pool = storage::init_test_db().await.expect("init db");
        let store = PreferenceStore::new(pool);

        let model = store.model("never/seen").await.expect("model");
        assert_eq!(model.version, 0);
        assert_eq!(model.data_points, 0);
    }
}
