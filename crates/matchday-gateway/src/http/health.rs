use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::ApiResult;

/// GET /health: liveness check plus today's remaining API calls.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let remaining = state.scheduler.remaining_requests()?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "api": state.config.api.base_url,
        "remaining_requests": remaining,
        "queued": state.scheduler.queue_len(),
        "timers": state.scheduler.timer_count(),
    })))
}
