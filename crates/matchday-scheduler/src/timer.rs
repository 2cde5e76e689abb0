//! Timer Service: one in-memory timer per scheduled task.
//!
//! Registrations are derived entirely from the Task Store, so
//! [`TimerService::register`] is all a restart needs to rebuild them. The
//! service polls the [`Clock`] and hands every due task to the [`Executor`]
//! synchronously, one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::{Calendar, Clock};
use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};
use crate::executor::{ExecutionOutcome, Executor};
use crate::types::{Task, TaskId};

#[derive(Debug, Clone)]
pub enum Trigger {
    Once,
    Cron(CronExpr),
}

#[derive(Debug, Clone)]
struct Timer {
    trigger: Trigger,
    next_fire: DateTime<Utc>,
}

/// Trigger and first firing instant for a timed task.
///
/// `execution_time` is an inclusive lower bound for recurring tasks. A
/// recurring task that already ran resumes strictly after its last run.
pub fn plan(task: &Task, calendar: &Calendar) -> Result<(Trigger, DateTime<Utc>)> {
    let start = task.execution_time.ok_or_else(|| {
        SchedulerError::InvalidTask(format!("task {} has no execution time", task.id))
    })?;

    let Some(expression) = task.recurrence.as_deref() else {
        return Ok((Trigger::Once, start));
    };

    let cron = CronExpr::parse(expression)?;
    let mut next = cron.next_at_or_after(start, calendar);
    if let (Some(candidate), Some(last)) = (next, task.last_run) {
        if candidate <= last {
            next = cron.next_after(last, calendar);
        }
    }
    let next = next.ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("`{expression}` never matches a real date"))
    })?;
    Ok((Trigger::Cron(cron), next))
}

pub struct TimerService {
    timers: Mutex<HashMap<TaskId, Timer>>,
    executor: Arc<Executor>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
}

impl TimerService {
    pub fn new(executor: Arc<Executor>, clock: Arc<dyn Clock>, calendar: Calendar) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            executor,
            clock,
            calendar,
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TaskId, Timer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) the timer for `task`. Returns the first firing.
    pub fn register(&self, task: &Task) -> Result<DateTime<Utc>> {
        let (trigger, next_fire) = plan(task, &self.calendar)?;
        debug!(task_id = %task.id, %next_fire, "timer registered");
        self.timers()
            .insert(task.id.clone(), Timer { trigger, next_fire });
        Ok(next_fire)
    }

    pub fn deregister(&self, id: &TaskId) -> bool {
        let removed = self.timers().remove(id).is_some();
        if removed {
            debug!(task_id = %id, "timer removed");
        }
        removed
    }

    pub fn is_registered(&self, id: &TaskId) -> bool {
        self.timers().contains_key(id)
    }

    pub fn next_fire(&self, id: &TaskId) -> Option<DateTime<Utc>> {
        self.timers().get(id).map(|t| t.next_fire)
    }

    pub fn len(&self) -> usize {
        self.timers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers().is_empty()
    }

    /// Fire every timer that is due now. Returns how many executions ran.
    ///
    /// A deferred firing (quota exhausted) stays due and is retried on the
    /// next tick; the remaining due timers wait with it.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();
        let mut due: Vec<(DateTime<Utc>, TaskId)> = self
            .timers()
            .iter()
            .filter(|(_, t)| t.next_fire <= now)
            .map(|(id, t)| (t.next_fire, id.clone()))
            .collect();
        due.sort();

        let mut fired = 0;
        for (scheduled_for, id) in due {
            // cancelled while an earlier timer was executing
            if !self.is_registered(&id) {
                continue;
            }
            match self.executor.execute(&id).await {
                Ok(ExecutionOutcome::Deferred) => {
                    debug!(task_id = %id, "timer firing deferred by quota");
                    break;
                }
                Ok(outcome) => {
                    if !matches!(outcome, ExecutionOutcome::Skipped) {
                        fired += 1;
                    }
                    self.advance(&id, scheduled_for);
                }
                Err(SchedulerError::TaskNotFound { .. }) => {
                    warn!(task_id = %id, "timer for unknown task dropped");
                    self.deregister(&id);
                }
                Err(e) => {
                    error!(task_id = %id, error = %e, "timer execution failed");
                }
            }
        }
        fired
    }

    /// Move a fired timer on: one-shots are dropped, recurring timers jump to
    /// the first match after both the fired instant and now, so a backlog of
    /// missed instants collapses into the single firing that just happened.
    fn advance(&self, id: &TaskId, scheduled_for: DateTime<Utc>) {
        let now = self.clock.now();
        let mut timers = self.timers();
        let next = match timers.get(id).map(|t| &t.trigger) {
            None => return,
            Some(Trigger::Once) => None,
            Some(Trigger::Cron(cron)) => cron.next_after(scheduled_for.max(now), &self.calendar),
        };
        match next {
            Some(next) => {
                if let Some(timer) = timers.get_mut(id) {
                    timer.next_fire = next;
                }
                debug!(task_id = %id, next_fire = %next, "recurring timer re-armed");
            }
            None => {
                timers.remove(id);
            }
        }
    }

    /// Poll loop. Exits when `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, poll: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(timers = self.len(), poll_ms = poll.as_millis() as u64, "timer service started");
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("timer service shutting down");
                        break;
                    }
                }
            }
        }
    }
}
