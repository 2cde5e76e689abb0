use matchday_scheduler::ProcessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An API element did not have the expected shape.
    #[error("malformed element: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("records connection lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, RecordsError>;

impl From<RecordsError> for ProcessError {
    fn from(e: RecordsError) -> Self {
        ProcessError::new(e.to_string())
    }
}
