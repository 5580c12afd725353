//! `POST /api/decisions`: record a reviewer decision.
//!
//! Feeds the preference-learning store and may resolve the workflow
//! (`AWAITING_REVIEW → COMPLETED`) when the decision lands on the summary
//! comment or completes the set of review comments.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use storage::records::{DecisionAction, DecisionRecord};

use crate::core::app_state::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub repository_id: String,
    pub workflow_id: String,
    pub comment_artifact_id: String,
    pub reviewer_id: String,
    /// ACCEPTED | DISMISSED | MODIFIED | RESOLVED_OTHER
    pub action: String,
    /// File, line, category, severity, snippet, language.
    pub context: Value,
    pub feedback: Option<String>,
}

pub async fn record(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let dev = state.config.dev_mode;
    let Some(action) = DecisionAction::parse(&request.action) else {
        return Err(ApiError::bad_request(format!(
            "unknown decision action {}",
            request.action
        )));
    };

    let decision = DecisionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        repository_id: request.repository_id,
        workflow_id: request.workflow_id.clone(),
        comment_artifact_id: request.comment_artifact_id.clone(),
        reviewer_id: request.reviewer_id,
        action,
        context: request.context,
        feedback: request.feedback,
        created_at: storage::now_ms(),
    };

    state.prefs.record(&decision).await.map_err(|e| match e {
        preference_learning::PreferenceError::InvalidContext(detail) => {
            ApiError::bad_request("invalid decision context").with_details(detail, dev)
        }
        preference_learning::PreferenceError::Storage(s) => ApiError::from_storage(s, dev),
    })?;

    let resolved = state
        .engine
        .decision_recorded(&request.workflow_id, &request.comment_artifact_id)
        .await
        .map_err(|e| ApiError::from_engine(e, dev))?;

    info!(
        decision_id = %decision.id,
        workflow_id = %request.workflow_id,
        resolved,
        "reviewer decision recorded"
    );
    Ok(Json(json!({
        "id": decision.id,
        "workflowResolved": resolved,
    })))
}
