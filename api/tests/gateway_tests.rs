//! HTTP-level tests for the ingestion gateway and REST surface.
//!
//! The state is assembled by hand: in-memory database, mock LLM, dry-run
//! publisher. Engine workers are not started, so enqueued workflows stay
//! queued and assertions run against persisted state.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use api::config::AppConfig;
use api::core::app_state::AppState;
use api::routes::dedup::DeliveryCache;
use api::routes::signature;
use git_publisher::types::ProviderKind;
use git_publisher::{
    InstallationLimiter, ProviderClient, ProviderConfig, PublishConfig, Publisher,
};
use llm_service::{LlmClient, LlmModelConfig};
use predictive_health::HealthService;
use preference_learning::PreferenceStore;
use realtime::{EventBus, Hub};
use storage::records::{ArtifactKind, ArtifactRecord, WorkflowRecord, WorkflowStatus};
use workflow_engine::{Engine, EngineConfig};

const SECRET: &str = "test-webhook-secret";

async fn test_state() -> Arc<AppState> {
    let pool = storage::init_test_db().await.expect("init db");

    let client = ProviderClient::from_config(ProviderConfig {
        kind: ProviderKind::GitHub,
        base_api: "http://127.0.0.1:9".to_string(),
        token: "tok".to_string(),
        installation_id: "inst-1".to_string(),
    })
    .expect("client");
    let publisher = Arc::new(Publisher::new(
        client,
        Arc::new(InstallationLimiter::new()),
        "inst-1".to_string(),
        PublishConfig {
            max_attempts: 1,
            dry_run: true,
        },
    ));
    let llm = Arc::new(LlmClient::from_config(LlmModelConfig::mock()).expect("llm"));
    let prefs = Arc::new(PreferenceStore::new(pool.clone()));
    let health = Arc::new(HealthService::new(pool.clone()));
    let bus = EventBus::local(256);
    let hub = Arc::new(Hub::new(bus.clone()));
    let engine = Arc::new(Engine::new(
        pool.clone(),
        publisher,
        llm,
        prefs.clone(),
        health.clone(),
        bus,
        EngineConfig::default(),
    ));

    Arc::new(AppState {
        pool,
        engine,
        hub,
        prefs,
        health,
        deliveries: DeliveryCache::default(),
        config: AppConfig {
            app_id: None,
            app_private_key: None,
            webhook_secret: SECRET.to_string(),
            session_secret: "session-secret".to_string(),
            bus_url: "local".to_string(),
            db_url: ":memory:".to_string(),
            provider_api_base: "http://127.0.0.1:9".to_string(),
            provider_token: "tok".to_string(),
            installation_id: "inst-1".to_string(),
            max_concurrent_workflows: None,
            max_agents_per_workflow: None,
            debounce_ms: None,
            bind_addr: "127.0.0.1:0".to_string(),
            dev_mode: true,
        },
    })
}

fn pr_payload(action: &str, sha: &str, draft: bool) -> Value {
    json!({
        "action": action,
        "pull_request": {
            "number": 7,
            "draft": draft,
            "head": {"sha": sha, "ref": "feature/cache"},
            "base": {"sha": "b".repeat(40), "ref": "main"}
        },
        "repository": {"full_name": "acme/widgets"}
    })
}

fn webhook_request(delivery_id: &str, body: &Value, signature_header: Option<String>) -> Request<Body> {
    let raw = serde_json::to_vec(body).expect("serialize");
    let signature_header =
        signature_header.unwrap_or_else(|| signature::sign(SECRET, &raw));
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/github")
        .header("content-type", "application/json")
        .header("x-delivery-id", delivery_id)
        .header("x-event-name", "pull_request")
        .header("x-signature-256", signature_header)
        .body(Body::from(raw))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn forged_signature_is_rejected_without_enqueue() {
    let state = test_state().await;
    let app = api::router(state.clone());

    let request = webhook_request(
        "d1",
        &json!({"a": 1}),
        Some(format!("sha256={}", "deadbeef".repeat(8))),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(
        storage::trigger_events::get(&state.pool, "d1").await.is_err(),
        "nothing may be stored for a forged delivery"
    );
}

#[tokio::test]
async fn single_byte_flip_in_body_rejects() {
    let state = test_state().await;
    let app = api::router(state);

    let body = pr_payload("opened", &"a".repeat(40), false);
    let mut raw = serde_json::to_vec(&body).expect("serialize");
    let header = signature::sign(SECRET, &raw);
    raw[10] ^= 0x01;

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/github")
        .header("x-delivery-id", "d1")
        .header("x-event-name", "pull_request")
        .header("x-signature-256", header)
        .body(Body::from(raw))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_webhook_is_accepted_and_creates_one_workflow() {
    let state = test_state().await;
    let app = api::router(state.clone());

    let response = app
        .oneshot(webhook_request(
            "d1",
            &pr_payload("opened", &"a".repeat(40), false),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "accepted");

    let active = storage::workflows::find_active_for_pr(&state.pool, "acme/widgets", 7)
        .await
        .expect("query");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, WorkflowStatus::Pending);
}

#[tokio::test]
async fn duplicate_delivery_id_acknowledged_once() {
    let state = test_state().await;

    let first = api::router(state.clone())
        .oneshot(webhook_request(
            "X",
            &pr_payload("opened", &"a".repeat(40), false),
            None,
        ))
        .await
        .expect("first");
    assert_eq!(body_json(first).await["status"], "accepted");

    let second = api::router(state.clone())
        .oneshot(webhook_request(
            "X",
            &pr_payload("opened", &"a".repeat(40), false),
            None,
        ))
        .await
        .expect("second");
    let body = body_json(second).await;
    assert_eq!(body["status"], "duplicate");

    // Exactly one workflow exists.
    let active = storage::workflows::find_active_for_pr(&state.pool, "acme/widgets", 7)
        .await
        .expect("query");
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn drafts_and_uninteresting_actions_are_skipped() {
    let state = test_state().await;

    let draft = api::router(state.clone())
        .oneshot(webhook_request(
            "d1",
            &pr_payload("opened", &"a".repeat(40), true),
            None,
        ))
        .await
        .expect("draft");
    assert_eq!(body_json(draft).await["status"], "skipped");

    let closed = api::router(state.clone())
        .oneshot(webhook_request(
            "d2",
            &pr_payload("closed", &"a".repeat(40), false),
            None,
        ))
        .await
        .expect("closed");
    assert_eq!(body_json(closed).await["status"], "skipped");

    // ready_for_review lifts the draft filter.
    let ready = api::router(state.clone())
        .oneshot(webhook_request(
            "d3",
            &pr_payload("ready_for_review", &"a".repeat(40), true),
            None,
        ))
        .await
        .expect("ready");
    assert_eq!(body_json(ready).await["status"], "accepted");
}

#[tokio::test]
async fn disabled_repository_is_skipped() {
    let state = test_state().await;
    let mut settings = storage::records::RepoSettingsRecord::default_for("acme/widgets");
    settings.enabled = false;
    storage::preferences::put_repo_settings(&state.pool, &settings)
        .await
        .expect("settings");

    let response = api::router(state)
        .oneshot(webhook_request(
            "d1",
            &pr_payload("opened", &"a".repeat(40), false),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(body_json(response).await["status"], "skipped");
}

#[tokio::test]
async fn excluded_branch_is_skipped() {
    let state = test_state().await;
    let mut settings = storage::records::RepoSettingsRecord::default_for("acme/widgets");
    settings.exclude_branches = Some("^feature/.*$".to_string());
    storage::preferences::put_repo_settings(&state.pool, &settings)
        .await
        .expect("settings");

    let response = api::router(state)
        .oneshot(webhook_request(
            "d1",
            &pr_payload("opened", &"a".repeat(40), false),
            None,
        ))
        .await
        .expect("response");
    assert_eq!(body_json(response).await["status"], "skipped");
}

#[tokio::test]
async fn missing_workflow_returns_error_envelope() {
    let state = test_state().await;
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .uri("/api/workflows/nope")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], "not_found");
    assert!(body["requestId"].as_str().is_some());
}

#[tokio::test]
async fn summary_decision_resolves_workflow() {
    let state = test_state().await;

    // Seed a workflow awaiting review with a published summary artifact.
    let workflow = WorkflowRecord {
        id: "w1".to_string(),
        repository_id: "acme/widgets".to_string(),
        pr_number: 7,
        head_sha: "a".repeat(40),
        base_sha: "b".repeat(40),
        author_login: "octocat".to_string(),
        status: WorkflowStatus::AwaitingReview,
        attempt: 0,
        trigger_event_id: "d1".to_string(),
        created_at: storage::now_ms() - 3_600_000,
        started_at: Some(storage::now_ms() - 3_500_000),
        completed_at: None,
        checkpoint_at: storage::now_ms(),
    };
    storage::workflows::insert(&state.pool, &workflow)
        .await
        .expect("workflow");
    let artifact = storage::artifacts::insert(
        &state.pool,
        &ArtifactRecord {
            id: "art-summary".to_string(),
            workflow_id: "w1".to_string(),
            kind: ArtifactKind::SummaryComment,
            payload: json!({"markdown": "## Summary"}),
            content_hash: "h1".to_string(),
            published_at: Some(storage::now_ms()),
            external_id: Some("ext-1".to_string()),
        },
    )
    .await
    .expect("artifact");

    let request = Request::builder()
        .method("POST")
        .uri("/api/decisions")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "repositoryId": "acme/widgets",
                "workflowId": "w1",
                "commentArtifactId": artifact.id,
                "reviewerId": "alice",
                "action": "ACCEPTED",
                "context": {
                    "file": null,
                    "line": null,
                    "category": "SUMMARY",
                    "severity": "LOW",
                    "snippet": "## Summary",
                    "language": null
                }
            }))
            .expect("serialize"),
        ))
        .expect("request");

    let response = api::router(state.clone())
        .oneshot(request)
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["workflowResolved"], true);

    let stored = storage::workflows::get(&state.pool, "w1").await.expect("get");
    assert_eq!(stored.status, WorkflowStatus::Completed);

    // The completion fed the learning store.
    let model = state.prefs.model("acme/widgets").await.expect("model");
    assert_eq!(model.data_points, 1);
}

#[tokio::test]
async fn preferences_patch_round_trips() {
    let state = test_state().await;

    let request = Request::builder()
        .method("PATCH")
        .uri("/api/repositories/acme%2Fwidgets/preferences")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "verbosity": "MINIMAL",
                "excludeBranches": "^wip/.*$",
                "includePaths": ["src/"]
            }))
            .expect("serialize"),
        ))
        .expect("request");
    let response = api::router(state.clone())
        .oneshot(request)
        .await
        .expect("patch");
    assert_eq!(response.status(), StatusCode::OK);

    let get = Request::builder()
        .uri("/api/repositories/acme%2Fwidgets/preferences")
        .body(Body::empty())
        .expect("request");
    let response = api::router(state).oneshot(get).await.expect("get");
    let body = body_json(response).await;
    assert_eq!(body["model"]["verbosity"], "MINIMAL");
    assert_eq!(body["settings"]["exclude_branches"], "^wip/.*$");
    assert_eq!(body["settings"]["include_paths"][0], "src/");
}
