//! SQLite-backed [`ResponseProcessor`](matchday_scheduler::ResponseProcessor):
//! turns football API payloads into league, club, player, match,
//! player-statistics and standings rows.

pub mod db;
pub mod error;
pub mod processor;
pub mod types;

pub use error::{RecordsError, Result};
pub use processor::RecordsProcessor;
pub use types::season_label;
