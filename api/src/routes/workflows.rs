//! Workflow read endpoints.
//!
//! `GET /api/workflows/:id`               workflow + agent runs + artifacts
//! `GET /api/workflows/:id/predictions`   predictive-health forecast

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use workflow_engine::observation;

use crate::core::app_state::AppState;
use crate::error::ApiError;

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let dev = state.config.dev_mode;
    let workflow = storage::workflows::get(&state.pool, &id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;
    let runs = storage::agent_runs::list_for_workflow(&state.pool, &id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;
    let artifacts = storage::artifacts::list_for_workflow(&state.pool, &id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;

    Ok(Json(json!({
        "workflow": workflow,
        "agentRuns": runs,
        "artifacts": artifacts,
    })))
}

pub async fn get_predictions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let dev = state.config.dev_mode;
    let workflow = storage::workflows::get(&state.pool, &id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;
    let runs = storage::agent_runs::list_for_workflow(&state.pool, &id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;

    let obs = observation::from_runs(&workflow, &runs);
    let prediction = state
        .health
        .predict_for(&workflow.repository_id, &obs)
        .await
        .map_err(|e| {
            ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "prediction failed",
            )
            .with_details(e.to_string(), dev)
        })?;

    Ok(Json(json!({
        "workflowId": workflow.id,
        "prediction": prediction,
    })))
}
