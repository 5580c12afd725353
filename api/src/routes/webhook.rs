//! Ingestion gateway: `POST /api/webhooks/github`.
//!
//! Order of checks (the body is read raw, byte-exact, before any parsing):
//! 1. signature header present, well-formed, and verified in constant time;
//! 2. delivery-id dedup (LRU fast path, trigger-event table authoritative);
//! 3. typed payload decode; only the four PR actions are accepted and
//!    drafts are dropped unless the action is `ready_for_review`;
//! 4. repository configuration (enabled flag, exclude-branches regex,
//!    include-paths prefixes);
//! 5. hand-off to the engine; enqueue failure maps to 503 so the provider
//!    retries.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use storage::records::{TriggerAction, TriggerEventRecord};
use workflow_engine::EngineError;

use crate::core::app_state::AppState;
use crate::error::ApiError;
use crate::routes::signature;

/// Typed view of the provider webhook payload. Unknown top-level fields are
/// tolerated; the fields used for dispatch are strict.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    action: String,
    pull_request: PayloadPullRequest,
    repository: PayloadRepository,
}

#[derive(Debug, Deserialize)]
struct PayloadPullRequest {
    number: i64,
    #[serde(default)]
    draft: bool,
    head: PayloadRef,
    #[serde(rename = "base")]
    _base: Option<PayloadRef>,
}

#[derive(Debug, Deserialize)]
struct PayloadRef {
    sha: String,
    #[serde(rename = "ref")]
    r#ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadRepository {
    full_name: String,
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    // 1. Signature, before touching the payload.
    let signature_header = headers
        .get("x-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !signature::verify(&state.config.webhook_secret, &body, signature_header) {
        warn!("webhook rejected: bad signature");
        return Err(ApiError::unauthorized());
    }

    let delivery_id = headers
        .get("x-delivery-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if delivery_id.is_empty() {
        return Err(ApiError::bad_request("missing X-Delivery-Id"));
    }
    let event_name = headers
        .get("x-event-name")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if event_name != "pull_request" {
        debug!(event_name, "ignoring non-PR event");
        return Ok(Json(json!({"status": "skipped"})));
    }

    // 2. Dedup (at-least-once → at-most-once).
    if state.deliveries.seen_or_insert(&delivery_id) {
        debug!(%delivery_id, "duplicate delivery (cache)");
        return Ok(Json(json!({"status": "duplicate"})));
    }

    // 3. Typed decode + action filter.
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "webhook payload rejected");
            return Err(
                ApiError::bad_request("malformed webhook payload")
                    .with_details(e.to_string(), state.config.dev_mode),
            );
        }
    };
    let Some(action) = TriggerAction::parse(&payload.action) else {
        debug!(action = %payload.action, "uninteresting action");
        return Ok(Json(json!({"status": "skipped"})));
    };
    if payload.pull_request.draft && action != TriggerAction::ReadyForReview {
        debug!("draft PR dropped");
        return Ok(Json(json!({"status": "skipped"})));
    }

    // 4. Repository configuration.
    let repository_id = payload.repository.full_name.clone();
    let settings = storage::preferences::repo_settings(&state.pool, &repository_id)
        .await
        .map_err(|e| ApiError::from_storage(e, state.config.dev_mode))?;
    if !settings.enabled {
        info!(%repository_id, "repository processing disabled");
        return Ok(Json(json!({"status": "skipped"})));
    }
    if let (Some(pattern), Some(head_ref)) = (
        settings.exclude_branches.as_deref(),
        payload.pull_request.head.r#ref.as_deref(),
    ) {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(head_ref) => {
                info!(%repository_id, head_ref, "branch excluded by settings");
                return Ok(Json(json!({"status": "skipped"})));
            }
            Ok(_) => {}
            Err(e) => warn!(%repository_id, error = %e, "invalid exclude-branches regex"),
        }
    }
    if !settings.include_paths.is_empty() {
        let touched = changed_paths_match(
            &state,
            &repository_id,
            payload.pull_request.number,
            &settings.include_paths,
        )
        .await;
        if !touched {
            info!(%repository_id, "no changed file matches include-paths");
            return Ok(Json(json!({"status": "skipped"})));
        }
    }

    // Durable dedup: the delivery id is the primary key.
    let event = TriggerEventRecord {
        delivery_id: delivery_id.clone(),
        action,
        repository_id,
        pr_number: payload.pull_request.number,
        head_sha: payload.pull_request.head.sha,
        received_at: storage::now_ms(),
    };
    let fresh = storage::trigger_events::insert_if_new(&state.pool, &event)
        .await
        .map_err(|e| ApiError::from_storage(e, state.config.dev_mode))?;
    if !fresh {
        debug!(%delivery_id, "duplicate delivery (store)");
        return Ok(Json(json!({"status": "duplicate"})));
    }

    // 5. Engine hand-off; the provider retries on 503.
    match state.engine.enqueue(&event).await {
        Ok(outcome) => {
            info!(delivery_id = %event.delivery_id, ?outcome, "webhook accepted");
            Ok(Json(json!({"status": "accepted"})))
        }
        Err(e @ EngineError::QueueClosed) => {
            Err(ApiError::unavailable("intake queue unavailable")
                .with_details(e.to_string(), state.config.dev_mode))
        }
        Err(e) => Err(ApiError::from_engine(e, state.config.dev_mode)),
    }
}

/// Check whether any changed file starts with one of the include prefixes.
/// The webhook payload does not carry the file list, so this asks the
/// provider; an error fails open (the pipeline filters later anyway).
async fn changed_paths_match(
    state: &AppState,
    repository_id: &str,
    pr_number: i64,
    include_paths: &[String],
) -> bool {
    let id = git_publisher::types::PullRequestId {
        repo: repository_id.to_string(),
        number: pr_number as u64,
    };
    match state.engine.provider_client().get_pull_request_files(&id).await {
        Ok(files) => files.iter().any(|f| {
            include_paths
                .iter()
                .any(|prefix| f.path.starts_with(prefix.as_str()))
        }),
        Err(e) => {
            warn!(repository_id, error = %e, "include-paths check failed open");
            true
        }
    }
}
