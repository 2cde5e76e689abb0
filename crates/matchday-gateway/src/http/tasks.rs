//! Task endpoints.
//!
//! | Method | Path                 | Operation     |
//! |--------|----------------------|---------------|
//! | GET    | `/tasks`             | list          |
//! | POST   | `/tasks`             | create        |
//! | GET    | `/tasks/{id}`        | get           |
//! | POST   | `/tasks/{id}/cancel` | cancel        |
//! | POST   | `/tasks/{id}/run`    | force-run     |

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use matchday_scheduler::{NewTask, SchedulerError, Task, TaskId, TaskKind, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::http::error::ApiResult;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// Body of `POST /tasks`. `kind` stays a string so unknown kinds surface
/// as `INVALID_TASK` rather than a body rejection.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub kind: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub execution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateTaskRequest {
    fn into_new_task(self) -> Result<NewTask, SchedulerError> {
        let kind: TaskKind = self.kind.trim().parse().map_err(SchedulerError::InvalidTask)?;
        Ok(NewTask {
            kind,
            endpoint: self.endpoint,
            parameters: self.parameters,
            execution_time: self.execution_time,
            recurrence: self.recurrence,
            description: self.description,
        })
    }
}

/// A task plus the instant its timer will next fire, if it has one.
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub next_fire: Option<DateTime<Utc>>,
}

fn view(state: &AppState, task: Task) -> TaskView {
    let next_fire = state.scheduler.next_fire(&task.id);
    TaskView { task, next_fire }
}

/// GET /tasks?status=&limit=
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(s.parse::<TaskStatus>().map_err(SchedulerError::InvalidTask)?),
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let tasks: Vec<TaskView> = state
        .scheduler
        .list_tasks(status, limit)?
        .into_iter()
        .map(|t| view(&state, t))
        .collect();
    Ok(Json(json!({ "count": tasks.len(), "tasks": tasks })))
}

/// POST /tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = state.scheduler.create_task(req.into_new_task()?)?;
    let task = state.scheduler.get_task(&id)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "status": task.status,
            "next_fire": state.scheduler.next_fire(&id),
        })),
    ))
}

/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let task = state.scheduler.get_task(&TaskId::from(id))?;
    Ok(Json(view(&state, task)))
}

/// POST /tasks/{id}/cancel
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let id = TaskId::from(id);
    state.scheduler.cancel(&id)?;
    let task = state.scheduler.get_task(&id)?;
    Ok(Json(view(&state, task)))
}

/// POST /tasks/{id}/run
pub async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = TaskId::from(id);
    state.scheduler.force_run(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "queued": state.scheduler.queue_len() })),
    ))
}
