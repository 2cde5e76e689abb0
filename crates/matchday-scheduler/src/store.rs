use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, OptionalExtension, Row};
use tracing::{debug, info, instrument};

use crate::db::{lock, parse_ts, ts, SharedConnection};
use crate::error::{Result, SchedulerError};
use crate::types::{Task, TaskId, TaskResult, TaskStatus};

const TASK_COLUMNS: &str = "id, kind, endpoint, parameters, execution_time, recurrence,
     status, description, created_at, updated_at, last_run, result";

/// Statuses from which a task may start running, cancel, or be force-run.
/// Recurring definitions remain live after a firing.
const IDLE_PREDICATE: &str = "(status IN ('pending', 'scheduled')
      OR (recurrence IS NOT NULL AND status IN ('completed', 'error')))";

/// Durable record of every task. Rows are never deleted.
#[derive(Clone)]
pub struct TaskStore {
    conn: SharedConnection,
}

impl TaskStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, kind = %task.kind))]
    pub fn insert(&self, task: &Task) -> Result<()> {
        let parameters = serde_json::to_string(&task.parameters)?;
        let result = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let db = lock(&self.conn)?;
        db.execute(
            "INSERT INTO tasks
             (id, kind, endpoint, parameters, execution_time, recurrence,
              status, description, created_at, updated_at, last_run, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                task.id.as_str(),
                task.kind.as_str(),
                task.endpoint,
                parameters,
                task.execution_time.map(ts),
                task.recurrence,
                task.status.as_str(),
                task.description,
                ts(task.created_at),
                ts(task.updated_at),
                task.last_run.map(ts),
                result,
            ],
        )?;
        debug!("task row written");
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn get(&self, id: &TaskId) -> Result<Task> {
        let db = lock(&self.conn)?;
        db.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id.as_str()],
            row_to_task,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
    }

    /// Newest first, optionally filtered by status.
    #[instrument(skip(self))]
    pub fn list(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        let db = lock(&self.conn)?;
        let limit = limit as i64;
        let tasks = match status {
            Some(status) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(rusqlite::params![status.as_str(), limit], row_to_task)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit], row_to_task)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(tasks)
    }

    /// PENDING → SCHEDULED once a timer holds the task.
    #[instrument(skip(self, now), fields(task_id = %id))]
    pub fn mark_scheduled(&self, id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let db = lock(&self.conn)?;
        let n = db.execute(
            "UPDATE tasks SET status = 'scheduled', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            rusqlite::params![id.as_str(), ts(now)],
        )?;
        Ok(n == 1)
    }

    /// Move an idle task to RUNNING and stamp `last_run`.
    ///
    /// Returns `false` when the task is no longer idle (cancelled, already
    /// running, or a finished one-shot), in which case nothing changes. The
    /// conditional update is what keeps a task from running twice at once.
    #[instrument(skip(self, now), fields(task_id = %id))]
    pub fn claim_running(&self, id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let db = lock(&self.conn)?;
        let n = db.execute(
            &format!(
                "UPDATE tasks SET status = 'running', last_run = ?2, updated_at = ?2
                 WHERE id = ?1 AND {IDLE_PREDICATE}"
            ),
            rusqlite::params![id.as_str(), ts(now)],
        )?;
        Ok(n == 1)
    }

    /// RUNNING → COMPLETED / ERROR with the execution result.
    #[instrument(skip(self, result, now), fields(task_id = %id, status = %status))]
    pub fn finish(
        &self,
        id: &TaskId,
        status: TaskStatus,
        result: &TaskResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = serde_json::to_string(result)?;
        let db = lock(&self.conn)?;
        db.execute(
            "UPDATE tasks SET status = ?2, result = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'running'",
            rusqlite::params![id.as_str(), status.as_str(), result, ts(now)],
        )?;
        Ok(())
    }

    /// Mark an idle task CANCELLED. Running and final tasks are rejected
    /// untouched.
    #[instrument(skip(self, now), fields(task_id = %id))]
    pub fn cancel(&self, id: &TaskId, now: DateTime<Utc>) -> Result<()> {
        let db = lock(&self.conn)?;
        let n = db.execute(
            &format!(
                "UPDATE tasks SET status = 'cancelled', updated_at = ?2
                 WHERE id = ?1 AND {IDLE_PREDICATE}"
            ),
            rusqlite::params![id.as_str(), ts(now)],
        )?;
        if n == 1 {
            info!("task cancelled");
            return Ok(());
        }
        Err(rejection(&db, id, "cancel")?)
    }

    /// Check that a task may be force-run, returning it.
    pub fn ensure_idle(&self, id: &TaskId, action: &'static str) -> Result<Task> {
        let task = self.get(id)?;
        if task.is_idle() {
            Ok(task)
        } else {
            Err(SchedulerError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                action,
            })
        }
    }

    /// Turn a scheduled one-shot into an immediate task: back to PENDING with
    /// no execution time.
    #[instrument(skip(self, now), fields(task_id = %id))]
    pub fn make_immediate(&self, id: &TaskId, now: DateTime<Utc>) -> Result<bool> {
        let db = lock(&self.conn)?;
        let n = db.execute(
            "UPDATE tasks SET status = 'pending', execution_time = NULL, updated_at = ?2
             WHERE id = ?1 AND recurrence IS NULL AND status IN ('pending', 'scheduled')",
            rusqlite::params![id.as_str(), ts(now)],
        )?;
        Ok(n == 1)
    }

    /// PENDING tasks with no execution time, oldest first.
    pub fn pending_immediate(&self) -> Result<Vec<TaskId>> {
        let db = lock(&self.conn)?;
        let mut stmt = db.prepare(
            "SELECT id FROM tasks
             WHERE status = 'pending' AND execution_time IS NULL
             ORDER BY created_at, id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0).map(TaskId))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Tasks the Timer Service must hold: timed one-shots that have not run
    /// yet and every recurring definition that is still live.
    pub fn timer_candidates(&self) -> Result<Vec<Task>> {
        let db = lock(&self.conn)?;
        let mut stmt = db.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE execution_time IS NOT NULL AND {IDLE_PREDICATE}
             ORDER BY created_at, id"
        ))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// RUNNING rows left behind by a crash become ERROR. No retry.
    pub fn fail_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = serde_json::to_string(&TaskResult::failed("interrupted by restart"))?;
        let db = lock(&self.conn)?;
        let n = db.execute(
            "UPDATE tasks SET status = 'error', result = ?1, updated_at = ?2
             WHERE status = 'running'",
            rusqlite::params![result, ts(now)],
        )?;
        Ok(n)
    }
}

/// Why an idle-only transition did not apply.
fn rejection(
    db: &rusqlite::Connection,
    id: &TaskId,
    action: &'static str,
) -> Result<SchedulerError> {
    let status: Option<String> = db
        .query_row("SELECT status FROM tasks WHERE id = ?1", [id.as_str()], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match status {
        None => SchedulerError::TaskNotFound { id: id.to_string() },
        Some(raw) => SchedulerError::InvalidTransition {
            id: id.to_string(),
            from: raw.parse().unwrap_or(TaskStatus::Error),
            action,
        },
    })
}

fn conversion<E>(col: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, e.into())
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let kind: String = row.get(1)?;
    let parameters: String = row.get(3)?;
    let execution_time: Option<String> = row.get(4)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    let last_run: Option<String> = row.get(10)?;
    let result: Option<String> = row.get(11)?;

    let parameters: BTreeMap<String, String> =
        serde_json::from_str(&parameters).map_err(|e| conversion(3, e))?;
    let result: Option<TaskResult> = result
        .map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(|e| conversion(11, e))?;

    Ok(Task {
        id: TaskId(row.get(0)?),
        kind: kind.parse().map_err(|e: String| conversion(1, e))?,
        endpoint: row.get(2)?,
        parameters,
        execution_time: execution_time.as_deref().map(parse_ts).transpose()?,
        recurrence: row.get(5)?,
        status: status.parse().map_err(|e: String| conversion(6, e))?,
        description: row.get(7)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        last_run: last_run.as_deref().map(parse_ts).transpose()?,
        result,
    })
}
