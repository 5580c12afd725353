//! `GET /health`: component readiness.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::core::app_state::AppState;
use crate::error::ApiError;

pub async fn get(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let db_ok = storage::ping(&state.pool).await;
    let (connections, presence, sessions) = state.hub.stats();

    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "db": db_ok,
        "realtime": {
            "connections": connections,
            "presence": presence,
            "sessions": sessions,
        },
    })))
}
