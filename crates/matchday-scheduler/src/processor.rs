use serde_json::Value;
use thiserror::Error;

use crate::types::{ImportSummary, TaskKind};

/// A payload arrived but could not be stored. Terminal for the task.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessError {
    pub message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns the `response` array of a successful call into domain records.
///
/// Implementations skip and note malformed elements rather than failing the
/// batch; `Err` is reserved for storage faults.
pub trait ResponseProcessor: Send + Sync {
    fn import_leagues(&self, items: &[Value]) -> Result<ImportSummary, ProcessError>;
    fn import_teams(&self, items: &[Value]) -> Result<ImportSummary, ProcessError>;
    fn import_players(&self, items: &[Value]) -> Result<ImportSummary, ProcessError>;
    fn import_fixtures(&self, items: &[Value]) -> Result<ImportSummary, ProcessError>;
    fn import_statistics(&self, items: &[Value]) -> Result<ImportSummary, ProcessError>;
    fn import_standings(&self, items: &[Value]) -> Result<ImportSummary, ProcessError>;
}

/// Route a payload to the entry point for `kind`.
pub fn dispatch(
    processor: &dyn ResponseProcessor,
    kind: TaskKind,
    items: &[Value],
) -> Result<ImportSummary, ProcessError> {
    match kind {
        TaskKind::ImportLeagues => processor.import_leagues(items),
        TaskKind::ImportTeams => processor.import_teams(items),
        TaskKind::ImportPlayers => processor.import_players(items),
        TaskKind::ImportFixtures => processor.import_fixtures(items),
        TaskKind::ImportStatistics => processor.import_statistics(items),
        TaskKind::ImportStandings => processor.import_standings(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(&'static str, usize)>>,
    }

    impl Recorder {
        fn hit(&self, name: &'static str, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.seen.lock().unwrap().push((name, items.len()));
            Ok(ImportSummary::default())
        }
    }

    impl ResponseProcessor for Recorder {
        fn import_leagues(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.hit("leagues", items)
        }
        fn import_teams(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.hit("teams", items)
        }
        fn import_players(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.hit("players", items)
        }
        fn import_fixtures(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.hit("fixtures", items)
        }
        fn import_statistics(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.hit("statistics", items)
        }
        fn import_standings(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
            self.hit("standings", items)
        }
    }

    #[test]
    fn every_kind_reaches_its_own_entry_point() {
        let rec = Recorder::default();
        let items = vec![Value::Null, Value::Null];
        for kind in TaskKind::ALL {
            dispatch(&rec, kind, &items).unwrap();
        }
        let seen = rec.seen.lock().unwrap();
        let names: Vec<&str> = seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            ["leagues", "teams", "players", "fixtures", "statistics", "standings"]
        );
        assert!(seen.iter().all(|(_, n)| *n == 2));
    }
}
