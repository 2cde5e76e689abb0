//! `matchday-core`: configuration and error types shared by every crate.

pub mod config;
pub mod error;

pub use config::MatchdayConfig;
pub use error::{MatchdayError, Result};
