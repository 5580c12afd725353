//! Predictive-health: merge-time and blocker forecasting.
//!
//! Offline loop over completed workflows:
//! 1. The engine appends a `health_sample` analytics event per completed
//!    workflow (feature observation + elapsed hours).
//! 2. [`HealthService::train_repo`] fits a per-repository linear regression
//!    over the samples and persists the weights as a `health_model` event.
//! 3. [`HealthService::predict_for`] loads the latest weights (heuristic
//!    fallback when none) and produces a bounded prediction.

pub mod features;
pub mod predict;
pub mod regression;

pub use features::{FeatureVector, Standardization, WorkflowObservation, FEATURE_NAMES};
pub use predict::{predict, Blocker, Prediction};
pub use regression::LinearModel;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use storage::{DbPool, StorageError};

const SAMPLE_KIND: &str = "health_sample";
const MODEL_KIND: &str = "health_model";
const MAX_TRAINING_SAMPLES: i64 = 500;

/// One persisted training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub workflow_id: String,
    pub observation: WorkflowObservation,
    /// Hours from PR creation to workflow completion (training target).
    pub outcome_hours: f64,
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

pub type HealthResult<T> = Result<T, HealthError>;

/// Store-backed training and prediction service.
pub struct HealthService {
    pool: DbPool,
}

impl HealthService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record one completed workflow as a training sample.
    pub async fn record_sample(
        &self,
        repository_id: &str,
        sample: &HealthSample,
    ) -> HealthResult<()> {
        let payload = serde_json::to_value(sample)
            .map_err(|e| HealthError::InvalidPayload(e.to_string()))?;
        storage::analytics::append(&self.pool, SAMPLE_KIND, Some(repository_id), &payload).await?;
        debug!(repository_id, workflow_id = %sample.workflow_id, "health sample recorded");
        Ok(())
    }

    /// Fit the repository model over accumulated samples and persist the
    /// weights. Returns the trained model, or `None` with too little data.
    pub async fn train_repo(&self, repository_id: &str) -> HealthResult<Option<LinearModel>> {
        let samples = self.load_samples(repository_id).await?;
        let features: Vec<Vec<f64>> = samples
            .iter()
            .map(|s| FeatureVector::from_observation(&s.observation).values)
            .collect();
        let targets: Vec<f64> = samples.iter().map(|s| s.outcome_hours).collect();

        let Some(model) = LinearModel::train(&features, &targets) else {
            debug!(repository_id, samples = samples.len(), "too few samples to train");
            return Ok(None);
        };

        let payload = serde_json::to_value(&model)
            .map_err(|e| HealthError::InvalidPayload(e.to_string()))?;
        storage::analytics::append(&self.pool, MODEL_KIND, Some(repository_id), &payload).await?;
        info!(
            repository_id,
            samples = model.samples,
            "predictive-health model trained"
        );
        Ok(Some(model))
    }

    /// Predict for a live workflow observation, using the latest trained
    /// weights when present.
    pub async fn predict_for(
        &self,
        repository_id: &str,
        obs: &WorkflowObservation,
    ) -> HealthResult<Prediction> {
        let model = match storage::analytics::latest(&self.pool, MODEL_KIND, Some(repository_id))
            .await?
        {
            Some(payload) => Some(
                serde_json::from_value::<LinearModel>(payload)
                    .map_err(|e| HealthError::InvalidPayload(format!("stored model: {e}")))?,
            ),
            None => None,
        };
        Ok(predict::predict(model.as_ref(), obs))
    }

    async fn load_samples(&self, repository_id: &str) -> HealthResult<Vec<HealthSample>> {
        // The analytics table is append-only; walk the recent window.
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM analytics_events \
             WHERE kind = ? AND repository_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(SAMPLE_KIND)
        .bind(repository_id)
        .bind(MAX_TRAINING_SAMPLES)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let mut samples = Vec::with_capacity(rows.len());
        for (payload,) in rows {
            let sample: HealthSample = serde_json::from_str(&payload)
                .map_err(|e| HealthError::InvalidPayload(format!("stored sample: {e}")))?;
            samples.push(sample);
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: u64) -> HealthSample {
        HealthSample {
            workflow_id: format!("w{i}"),
            observation: WorkflowObservation {
                files: i,
                lines_added: i * 120,
                lines_deleted: i * 10,
                risk_score: (i % 3) as f64,
                critical_issues: 0,
                high_issues: i % 2,
                pr_age_hours: i as f64,
                is_weekend: false,
                hour_of_day: 12,
                author_merge_rate: 0.8,
                author_avg_merge_time_hours: 10.0,
                repo_avg_merge_time_hours: 16.0,
                repo_avg_review_latency_minutes: 60.0,
                has_tests: true,
                has_description: true,
                reviewer_availability: 0.7,
                author_sample_count: 8,
                repo_sample_count: 25,
                reviewer_count: 2,
            },
            outcome_hours: 2.0 + i as f64,
        }
    }

    #[tokio::test]
    async fn train_then_predict_uses_model() {
        let pool = storage::init_test_db().await.expect("init db");
        let service = HealthService::new(pool);

        for i in 1..=25 {
            service
                .record_sample("acme/widgets", &sample(i))
                .await
                .expect("record");
        }

        let model = service
            .train_repo("acme/widgets")
            .await
            .expect("train")
            .expect("model present");
        assert_eq!(model.samples, 25);

        let prediction = service
            .predict_for("acme/widgets", &sample(5).observation)
            .await
            .expect("predict");
        assert_eq!(prediction.source, "model");
        assert!((1.0..=168.0).contains(&prediction.merge_time_hours));
    }

    #[tokio::test]
    async fn no_samples_falls_back_to_heuristic() {
        let pool = storage::init_test_db().await.expect("init db");
        let service = HealthService::new(pool);

        assert!(service
            .train_repo("empty/repo")
            .await
            .expect("train")
            .is_none());

        let prediction = service
            .predict_for("empty/repo", &sample(3).observation)
            .await
            .expect("predict");
        assert_eq!(prediction.source, "heuristic");
    }
}
