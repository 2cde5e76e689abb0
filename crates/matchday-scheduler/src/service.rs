use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use matchday_core::config::SchedulerConfig;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{Calendar, Clock};
use crate::cron::CronExpr;
use crate::db::SharedConnection;
use crate::error::{Result, SchedulerError};
use crate::executor::Executor;
use crate::processor::ResponseProcessor;
use crate::queue::ImmediateQueue;
use crate::quota::{DailyUsage, EndpointUsage, QuotaLedger};
use crate::store::TaskStore;
use crate::timer::{self, TimerService};
use crate::transport::ApiTransport;
use crate::types::{NewTask, Task, TaskId, TaskStatus};
use crate::worker::{Worker, WorkerTiming};

/// Counts from [`SchedulingService::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// RUNNING tasks marked ERROR.
    pub interrupted: usize,
    /// Quota day rows whose in-flight reservations were dropped.
    pub reservations_cleared: usize,
    pub timers_restored: usize,
    /// Timed tasks whose stored schedule could not be re-armed.
    pub timers_failed: usize,
    pub requeued: usize,
}

/// The one object callers talk to. Owns the store, the quota ledger, the
/// Timer Service and the Immediate Queue, and wires them to one executor.
pub struct SchedulingService {
    store: TaskStore,
    quota: QuotaLedger,
    queue: Arc<ImmediateQueue>,
    timers: Arc<TimerService>,
    worker: Arc<Worker>,
    transport: Arc<dyn ApiTransport>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    timer_poll: Duration,
}

impl SchedulingService {
    pub fn new(
        conn: SharedConnection,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn ApiTransport>,
        processor: Arc<dyn ResponseProcessor>,
        config: &SchedulerConfig,
    ) -> Self {
        let calendar = Calendar::from_offset_minutes(config.utc_offset_minutes);
        let store = TaskStore::new(conn.clone());
        let quota = QuotaLedger::new(conn, config.daily_limit);
        let executor = Arc::new(Executor::new(
            store.clone(),
            quota.clone(),
            Arc::clone(&transport),
            processor,
            Arc::clone(&clock),
            calendar,
        ));
        let queue = Arc::new(ImmediateQueue::new());
        let timers = Arc::new(TimerService::new(
            Arc::clone(&executor),
            Arc::clone(&clock),
            calendar,
        ));
        let worker = Arc::new(Worker::new(
            Arc::clone(&queue),
            executor,
            quota.clone(),
            Arc::clone(&clock),
            calendar,
            WorkerTiming {
                queue_poll: Duration::from_secs(config.queue_poll_secs.max(1)),
                quota_recheck: Duration::from_secs(config.quota_recheck_secs.max(1)),
                politeness: Duration::from_millis(config.politeness_delay_ms),
            },
        ));

        Self {
            store,
            quota,
            queue,
            timers,
            worker,
            transport,
            clock,
            calendar,
            timer_poll: Duration::from_millis(config.timer_poll_ms.max(10)),
        }
    }

    /// Validate, persist, and hand the task to the Timer Service or the
    /// Immediate Queue. Nothing is written when validation fails.
    pub fn create_task(&self, new: NewTask) -> Result<TaskId> {
        if !self.transport.has_credential() {
            return Err(SchedulerError::MissingCredential);
        }

        let endpoint = match new.endpoint.trim() {
            "" => new.kind.default_endpoint().to_string(),
            e if e.contains(|c: char| c.is_whitespace() || c == '?' || c == '#') => {
                return Err(SchedulerError::InvalidTask(format!(
                    "endpoint `{e}` must be a bare API path"
                )));
            }
            e => e.trim_matches('/').to_string(),
        };
        if new.parameters.keys().any(|k| k.trim().is_empty()) {
            return Err(SchedulerError::InvalidTask(
                "parameter names must not be empty".into(),
            ));
        }

        let recurrence = match new.recurrence.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(expr) => Some(CronExpr::parse(expr)?.to_string()),
        };

        let now = self.clock.now();
        let execution_time = match (new.execution_time, &recurrence) {
            (None, Some(_)) => Some(now),
            (t, _) => t,
        };

        let task = Task {
            id: TaskId::new(),
            kind: new.kind,
            endpoint,
            parameters: new.parameters,
            execution_time,
            recurrence,
            status: TaskStatus::Pending,
            description: Some(
                new.description
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| new.kind.default_description().to_string()),
            ),
            created_at: now,
            updated_at: now,
            last_run: None,
            result: None,
        };

        if task.execution_time.is_some() {
            // rejects cron expressions that can never fire
            timer::plan(&task, &self.calendar)?;
        }

        self.store.insert(&task)?;

        if task.execution_time.is_some() {
            let next_fire = self.timers.register(&task)?;
            self.store.mark_scheduled(&task.id, now)?;
            info!(
                task_id = %task.id,
                kind = %task.kind,
                %next_fire,
                recurring = task.is_recurring(),
                "task scheduled"
            );
        } else {
            self.queue.push(task.id.clone());
            info!(
                task_id = %task.id,
                kind = %task.kind,
                queued = self.queue.len(),
                "task queued for immediate run"
            );
        }
        Ok(task.id)
    }

    /// Cancel a task that has not started. Running and final tasks are
    /// rejected without any change.
    pub fn cancel(&self, id: &TaskId) -> Result<()> {
        self.store.cancel(id, self.clock.now())?;
        self.timers.deregister(id);
        self.queue.remove(id);
        Ok(())
    }

    /// Push an idle task onto the Immediate Queue now, ignoring its
    /// execution time. A scheduled one-shot loses its timer and becomes an
    /// ordinary immediate task; a recurring task keeps its timer.
    pub fn force_run(&self, id: &TaskId) -> Result<()> {
        let task = self.store.ensure_idle(id, "force-run")?;
        if !task.is_recurring() && task.execution_time.is_some() {
            self.timers.deregister(id);
            self.store.make_immediate(id, self.clock.now())?;
        }
        self.queue.push(id.clone());
        info!(task_id = %id, queued = self.queue.len(), "task force-run requested");
        Ok(())
    }

    /// Calls left today on the server calendar.
    pub fn remaining_requests(&self) -> Result<u32> {
        self.quota.remaining(self.today())
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.store.get(id)
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>, limit: usize) -> Result<Vec<Task>> {
        self.store.list(status, limit)
    }

    /// Next firing instant held by the Timer Service, if any.
    pub fn next_fire(&self, id: &TaskId) -> Option<DateTime<Utc>> {
        self.timers.next_fire(id)
    }

    pub fn quota_today(&self) -> Result<DailyUsage> {
        self.quota.usage(self.today())
    }

    pub fn set_daily_limit(&self, limit: u32) -> Result<DailyUsage> {
        self.quota.set_limit(self.today(), limit)
    }

    /// Recompute today's `used` from the audit log.
    pub fn rebuild_quota(&self) -> Result<DailyUsage> {
        let today = self.today();
        self.quota.rebuild(today)?;
        self.quota.usage(today)
    }

    pub fn daily_usage(&self, days: u32) -> Result<Vec<DailyUsage>> {
        self.quota.daily_usage(self.today(), days)
    }

    pub fn endpoint_usage(&self) -> Result<Vec<EndpointUsage>> {
        self.quota.endpoint_usage()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    fn today(&self) -> chrono::NaiveDate {
        self.calendar.day(self.clock.now())
    }

    /// Rebuild in-memory state from the store after a (re)start. Must run
    /// before [`SchedulingService::spawn`].
    pub fn recover(&self) -> Result<RecoveryReport> {
        let now = self.clock.now();
        let mut report = RecoveryReport {
            interrupted: self.store.fail_interrupted(now)?,
            reservations_cleared: self.quota.clear_reservations()?,
            ..Default::default()
        };
        if report.interrupted > 0 {
            warn!(count = report.interrupted, "tasks interrupted by restart marked as error");
        }

        for task in self.store.timer_candidates()? {
            match self.timers.register(&task) {
                Ok(_) => {
                    if task.status == TaskStatus::Pending {
                        self.store.mark_scheduled(&task.id, now)?;
                    }
                    report.timers_restored += 1;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "stored schedule could not be restored");
                    report.timers_failed += 1;
                }
            }
        }

        for id in self.store.pending_immediate()? {
            if self.queue.push(id) {
                report.requeued += 1;
            }
        }

        info!(
            interrupted = report.interrupted,
            timers = report.timers_restored,
            requeued = report.requeued,
            "scheduler state recovered"
        );
        Ok(report)
    }

    /// Start the Timer Service and the Immediate Queue worker.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let timers = Arc::clone(&self.timers);
        let worker = Arc::clone(&self.worker);
        let poll = self.timer_poll;
        let timer_shutdown = shutdown.clone();
        vec![
            tokio::spawn(async move { timers.run(poll, timer_shutdown).await }),
            tokio::spawn(async move { worker.run(shutdown).await }),
        ]
    }
}
