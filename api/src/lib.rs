//! HTTP surface and bootstrap for the PR review backend.
//!
//! `start()` wires the whole system: storage pool, provider client +
//! publisher, LLM client, preference store, predictive-health service,
//! realtime hub, and the workflow engine, then serves the axum router.
//! Components are constructor-injected; tests assemble their own
//! [`AppState`] and call [`router`] directly.

pub mod config;
pub mod core;
pub mod error;
pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use git_publisher::types::ProviderKind;
use git_publisher::{
    InstallationLimiter, ProviderClient, ProviderConfig, PublishConfig, Publisher,
};
use llm_service::{LlmClient, LlmModelConfig};
use predictive_health::HealthService;
use preference_learning::PreferenceStore;
use realtime::{spawn_bus_pump, spawn_heartbeat, EventBus, Hub};
use workflow_engine::{Engine, EngineConfig};

use crate::config::AppConfig;
use crate::core::app_state::AppState;
use crate::routes::dedup::DeliveryCache;

/// Build the router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::get))
        .route("/api/webhooks/github", post(routes::webhook::receive))
        .route("/api/workflows/{id}", get(routes::workflows::get_workflow))
        .route(
            "/api/workflows/{id}/predictions",
            get(routes::workflows::get_predictions),
        )
        .route("/api/decisions", post(routes::decisions::record))
        .route(
            "/api/repositories/{id}/preferences",
            get(routes::preferences::get).patch(routes::preferences::patch),
        )
        .route("/api/ws", get(ws::upgrade))
        .with_state(state)
}

/// Assemble the full application state from configuration.
pub async fn build_state(config: AppConfig) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let pool = storage::init_db(&config.db_url).await?;

    let client = ProviderClient::from_config(ProviderConfig {
        kind: ProviderKind::GitHub,
        base_api: config.provider_api_base.clone(),
        token: config.provider_token.clone(),
        installation_id: config.installation_id.clone(),
    })?;
    let publisher = Arc::new(Publisher::new(
        client,
        Arc::new(InstallationLimiter::new()),
        config.installation_id.clone(),
        PublishConfig::default(),
    ));

    let llm = Arc::new(LlmClient::from_config(LlmModelConfig::from_env()?)?);
    let prefs = Arc::new(PreferenceStore::new(pool.clone()));
    let health = Arc::new(HealthService::new(pool.clone()));

    // "local" keeps fan-out in-process; a shared bus backend hooks in here.
    let bus = EventBus::local(4096);
    let hub = Arc::new(Hub::new(bus.clone()));

    let mut engine_cfg = EngineConfig::default();
    if let Some(n) = config.max_concurrent_workflows {
        engine_cfg.max_concurrent_workflows = n;
    }
    if let Some(n) = config.max_agents_per_workflow {
        engine_cfg.max_agents_per_workflow = n;
    }
    if let Some(ms) = config.debounce_ms {
        engine_cfg.debounce_ms = ms;
    }
    let engine = Arc::new(Engine::new(
        pool.clone(),
        publisher,
        llm,
        prefs.clone(),
        health.clone(),
        bus,
        engine_cfg,
    ));

    Ok(Arc::new(AppState {
        pool,
        engine,
        hub,
        prefs,
        health,
        deliveries: DeliveryCache::default(),
        config,
    }))
}

/// Boot the whole service. Blocks until the listener stops.
pub async fn start() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!("starting pr-ai-backend: {}", config.banner());

    let state = build_state(config.clone()).await?;

    // Background machinery: engine workers, crash resume, bus pump,
    // heartbeat sweep.
    state.engine.clone().start();
    let resumed = state.engine.resume_stale().await?;
    if resumed > 0 {
        info!(resumed, "workflows re-queued from previous run");
    }
    spawn_bus_pump(state.hub.clone());
    spawn_heartbeat(state.hub.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
