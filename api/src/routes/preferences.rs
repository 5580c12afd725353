//! Repository preference endpoints.
//!
//! `GET   /api/repositories/:id/preferences`   learned model + settings
//! `PATCH /api/repositories/:id/preferences`   custom rules, verbosity,
//!                                             gateway filters
//!
//! Repository ids contain slashes; clients URL-encode them
//! (`acme%2Fwidgets`).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use preference_learning::{TeamRule, Verbosity};

use crate::core::app_state::AppState;
use crate::error::ApiError;

fn decode_repo_id(raw: &str) -> Result<String, ApiError> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| ApiError::bad_request("repository id is not valid UTF-8"))?;
    if decoded.trim().is_empty() {
        return Err(ApiError::bad_request("empty repository id"));
    }
    Ok(decoded.into_owned())
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let dev = state.config.dev_mode;
    let repository_id = decode_repo_id(&id)?;

    let model = state.prefs.model(&repository_id).await.map_err(|e| {
        ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "preference load failed",
        )
        .with_details(e.to_string(), dev)
    })?;
    let settings = storage::preferences::repo_settings(&state.pool, &repository_id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;

    Ok(Json(json!({
        "model": &*model,
        "settings": settings,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    pub custom_rules: Option<Vec<TeamRule>>,
    /// MINIMAL | BALANCED | DETAILED
    pub verbosity: Option<Verbosity>,
    pub enabled: Option<bool>,
    pub exclude_branches: Option<String>,
    pub include_paths: Option<Vec<String>>,
}

pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<PreferencesPatch>,
) -> Result<Json<Value>, ApiError> {
    let dev = state.config.dev_mode;
    let repository_id = decode_repo_id(&id)?;

    if let Some(pattern) = patch.exclude_branches.as_deref() {
        if regex::Regex::new(pattern).is_err() {
            return Err(ApiError::bad_request("excludeBranches is not a valid regex"));
        }
    }

    let model = state
        .prefs
        .update_settings(&repository_id, patch.custom_rules, patch.verbosity)
        .await
        .map_err(|e| {
            ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "preference update failed",
            )
            .with_details(e.to_string(), dev)
        })?;

    let mut settings = storage::preferences::repo_settings(&state.pool, &repository_id)
        .await
        .map_err(|e| ApiError::from_storage(e, dev))?;
    let mut settings_changed = false;
    if let Some(enabled) = patch.enabled {
        settings.enabled = enabled;
        settings_changed = true;
    }
    if let Some(exclude) = patch.exclude_branches {
        settings.exclude_branches = if exclude.is_empty() {
            None
        } else {
            Some(exclude)
        };
        settings_changed = true;
    }
    if let Some(paths) = patch.include_paths {
        settings.include_paths = paths;
        settings_changed = true;
    }
    if settings_changed {
        storage::preferences::put_repo_settings(&state.pool, &settings)
            .await
            .map_err(|e| ApiError::from_storage(e, dev))?;
    }

    Ok(Json(json!({
        "model": &*model,
        "settings": settings,
    })))
}
