use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use matchday_scheduler::DailyUsage;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::http::error::ApiResult;

const DEFAULT_USAGE_DAYS: u32 = 7;
const MAX_USAGE_DAYS: u32 = 90;

#[derive(Debug, Deserialize)]
pub struct LimitRequest {
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub days: Option<u32>,
}

/// GET /quota: today's `{date, used, limit, remaining}`.
pub async fn get_quota(State(state): State<Arc<AppState>>) -> ApiResult<Json<DailyUsage>> {
    Ok(Json(state.scheduler.quota_today()?))
}

/// PUT /quota/limit: operator override of the daily ceiling.
pub async fn set_limit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LimitRequest>,
) -> ApiResult<Json<DailyUsage>> {
    let usage = state.scheduler.set_daily_limit(req.limit)?;
    tracing::info!(limit = req.limit, remaining = usage.remaining, "daily limit changed");
    Ok(Json(usage))
}

/// POST /quota/rebuild: recount today's `used` from the call audit log.
pub async fn rebuild(State(state): State<Arc<AppState>>) -> ApiResult<Json<DailyUsage>> {
    Ok(Json(state.scheduler.rebuild_quota()?))
}

/// GET /usage?days=
pub async fn usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<Value>> {
    let days = query
        .days
        .unwrap_or(DEFAULT_USAGE_DAYS)
        .clamp(1, MAX_USAGE_DAYS);
    Ok(Json(json!({
        "days": state.scheduler.daily_usage(days)?,
        "endpoints": state.scheduler.endpoint_usage()?,
    })))
}
