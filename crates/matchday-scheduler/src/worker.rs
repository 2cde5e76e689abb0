use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::clock::{Calendar, Clock};
use crate::executor::{ExecutionOutcome, Executor};
use crate::queue::ImmediateQueue;
use crate::quota::QuotaLedger;
use crate::types::TaskId;

/// Loop cadences for the immediate-queue consumer.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTiming {
    /// Block-wait on an empty queue before re-checking quota.
    pub queue_poll: Duration,
    /// Sleep while today's quota is used up.
    pub quota_recheck: Duration,
    /// Pause after every outbound call.
    pub politeness: Duration,
}

/// What one pass of the worker loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStep {
    /// No admissible slot left today (used or in flight); slept
    /// `quota_recheck` without touching the queue.
    QuotaExhausted,
    /// Nothing arrived within `queue_poll`.
    Idle,
    /// A task was handed to the executor.
    Ran(TaskId, ExecutionOutcome),
    /// The executor raised an error for this task; the loop carries on.
    Errored(TaskId),
}

/// Single consumer of the [`ImmediateQueue`]. Immediate tasks are executed
/// one at a time through this path only.
pub struct Worker {
    queue: Arc<ImmediateQueue>,
    executor: Arc<Executor>,
    quota: QuotaLedger,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    timing: WorkerTiming,
}

impl Worker {
    pub fn new(
        queue: Arc<ImmediateQueue>,
        executor: Arc<Executor>,
        quota: QuotaLedger,
        clock: Arc<dyn Clock>,
        calendar: Calendar,
        timing: WorkerTiming,
    ) -> Self {
        Self {
            queue,
            executor,
            quota,
            clock,
            calendar,
            timing,
        }
    }

    /// One iteration: quota check, bounded wait, execute, politeness delay.
    pub async fn step(&self) -> WorkerStep {
        let today = self.calendar.day(self.clock.now());
        // same admission rule as try_reserve, so in-flight calls count
        let available = match self.quota.available(today) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "quota check failed");
                0
            }
        };
        if available == 0 {
            debug!(%today, queued = self.queue.len(), "quota exhausted, worker sleeping");
            tokio::time::sleep(self.timing.quota_recheck).await;
            return WorkerStep::QuotaExhausted;
        }

        let Some(id) = self.queue.pop_timeout(self.timing.queue_poll).await else {
            return WorkerStep::Idle;
        };

        match self.executor.execute(&id).await {
            Ok(ExecutionOutcome::Deferred) => {
                // another execution took the last slot between check and reserve
                self.queue.push_front(id.clone());
                tokio::time::sleep(self.timing.quota_recheck).await;
                WorkerStep::Ran(id, ExecutionOutcome::Deferred)
            }
            Ok(ExecutionOutcome::Skipped) => WorkerStep::Ran(id, ExecutionOutcome::Skipped),
            Ok(outcome) => {
                tokio::time::sleep(self.timing.politeness).await;
                WorkerStep::Ran(id, outcome)
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "immediate task failed");
                tokio::time::sleep(self.timing.politeness).await;
                WorkerStep::Errored(id)
            }
        }
    }

    /// Consume the queue until `shutdown` flips to `true`. Never exits on a
    /// task failure.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(queued = self.queue.len(), "immediate queue worker started");
        loop {
            tokio::select! {
                _ = self.step() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("immediate queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
