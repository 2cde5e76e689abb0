use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchdayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatchdayError {
    /// Short error code string, logged alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            MatchdayError::Config(_) => "CONFIG_ERROR",
            MatchdayError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MatchdayError>;
