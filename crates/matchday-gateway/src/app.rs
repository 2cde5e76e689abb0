use axum::{
    routing::{get, post, put},
    Router,
};
use matchday_core::config::MatchdayConfig;
use matchday_scheduler::SchedulingService;
use std::sync::Arc;

use crate::http::{health, quota, tasks};

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: MatchdayConfig,
    pub scheduler: SchedulingService,
}

impl AppState {
    pub fn new(config: MatchdayConfig, scheduler: SchedulingService) -> Self {
        Self { config, scheduler }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/tasks/{id}/run", post(tasks::run_task))
        .route("/quota", get(quota::get_quota))
        .route("/quota/limit", put(quota::set_limit))
        .route("/quota/rebuild", post(quota::rebuild))
        .route("/usage", get(quota::usage))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
