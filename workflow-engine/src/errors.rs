//! Engine error hierarchy.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors the engine handles around a workflow run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] storage::StorageError),

    #[error(transparent)]
    Provider(#[from] git_publisher::Error),

    #[error(transparent)]
    Preference(#[from] preference_learning::PreferenceError),

    #[error(transparent)]
    Health(#[from] predictive_health::HealthError),

    #[error("workflow {0} is in a state that cannot run")]
    NotRunnable(String),

    #[error("intake queue closed")]
    QueueClosed,
}

impl EngineError {
    /// Transient errors re-enter the backoff loop; everything else fails
    /// the workflow.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Provider(e) => e.is_transient(),
            // Idempotent checkpoint writes are retried a few times by the
            // runner before giving up.
            EngineError::Storage(storage::StorageError::Query { .. }) => true,
            _ => false,
        }
    }
}
