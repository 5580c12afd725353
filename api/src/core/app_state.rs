//! Shared state for all handlers. Constructed once in `start()`; tests
//! build a fresh one per case; there are no process-wide singletons.

use std::sync::Arc;

use predictive_health::HealthService;
use preference_learning::PreferenceStore;
use realtime::Hub;
use storage::DbPool;
use workflow_engine::Engine;

use crate::config::AppConfig;
use crate::routes::dedup::DeliveryCache;

/// Shared application state, cloned per handler via `Arc`.
pub struct AppState {
    pub pool: DbPool,
    pub engine: Arc<Engine>,
    pub hub: Arc<Hub>,
    pub prefs: Arc<PreferenceStore>,
    pub health: Arc<HealthService>,
    /// Bounded LRU of recent webhook delivery ids.
    pub deliveries: DeliveryCache,
    pub config: AppConfig,
}
