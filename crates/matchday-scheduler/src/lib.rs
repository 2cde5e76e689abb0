//! `matchday-scheduler`: quota-governed import scheduling for a rate-limited
//! sports-data API.
//!
//! # Overview
//!
//! Tasks are persisted to a SQLite `tasks` table by the [`store::TaskStore`].
//! A task with an execution time is held by the [`timer::TimerService`]; a
//! task without one goes onto the [`queue::ImmediateQueue`], drained by a
//! single [`worker::Worker`]. Both paths end in the [`executor::Executor`],
//! which reserves a slot in the [`quota::QuotaLedger`], makes the call,
//! charges the day and writes the audit row, then hands the payload to a
//! [`processor::ResponseProcessor`].
//!
//! [`SchedulingService`] wires everything together and is the only type the
//! gateway needs.
//!
//! # Task lifecycle
//!
//! | From                     | Event             | To                    |
//! |--------------------------|-------------------|-----------------------|
//! | (new)                    | create            | `pending`             |
//! | `pending`                | timer registered  | `scheduled`           |
//! | `pending` / `scheduled`  | fired / dequeued  | `running`             |
//! | `running`                | success           | `completed`           |
//! | `running`                | any fault         | `error`               |
//! | `pending` / `scheduled`  | cancel            | `cancelled`           |
//!
//! Recurring tasks return to `running` from `completed` or `error` at their
//! next cron match; their status always describes the latest firing.

pub mod clock;
pub mod cron;
pub mod db;
pub mod error;
pub mod executor;
pub mod processor;
pub mod queue;
pub mod quota;
pub mod service;
pub mod store;
pub mod timer;
pub mod transport;
pub mod types;
pub mod worker;

pub use clock::{Calendar, Clock, ManualClock, SystemClock};
pub use cron::CronExpr;
pub use error::{Result, SchedulerError};
pub use executor::ExecutionOutcome;
pub use processor::{ProcessError, ResponseProcessor};
pub use quota::{DailyUsage, EndpointUsage};
pub use service::{RecoveryReport, SchedulingService};
pub use transport::{ApiResponse, ApiTransport, HttpTransport, TransportError};
pub use types::{ImportSummary, NewTask, Task, TaskId, TaskKind, TaskResult, TaskStatus};
pub use worker::WorkerStep;
