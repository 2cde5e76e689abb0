use thiserror::Error;

use crate::types::TaskStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The recurrence expression is not a valid 5-field cron string.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The task definition is rejected before anything is persisted.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// No task with the given ID exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// The requested transition is not allowed from the task's current state.
    #[error("Cannot {action} task {id} while it is {from}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        action: &'static str,
    },

    /// Daily limits must allow at least one call.
    #[error("Invalid daily limit: {0}")]
    InvalidLimit(u32),

    /// No API key is configured, so no call could ever succeed.
    #[error("API credential is not configured")]
    MissingCredential,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A thread panicked while holding the store connection.
    #[error("Store connection lock poisoned")]
    StorePoisoned,
}

impl SchedulerError {
    /// Short error code string sent to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::InvalidTask(_) => "INVALID_TASK",
            SchedulerError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            SchedulerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SchedulerError::InvalidLimit(_) => "INVALID_LIMIT",
            SchedulerError::MissingCredential => "MISSING_CREDENTIAL",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::StorePoisoned => "STORE_POISONED",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
