use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task identity (UUIDv7, time-sortable, so creation order survives a restart).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Closed set of import jobs. Each kind maps to one Response Processor entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ImportLeagues,
    ImportTeams,
    ImportPlayers,
    ImportFixtures,
    ImportStatistics,
    ImportStandings,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::ImportLeagues,
        TaskKind::ImportTeams,
        TaskKind::ImportPlayers,
        TaskKind::ImportFixtures,
        TaskKind::ImportStatistics,
        TaskKind::ImportStandings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ImportLeagues => "import_leagues",
            TaskKind::ImportTeams => "import_teams",
            TaskKind::ImportPlayers => "import_players",
            TaskKind::ImportFixtures => "import_fixtures",
            TaskKind::ImportStatistics => "import_statistics",
            TaskKind::ImportStandings => "import_standings",
        }
    }

    /// API path used when the caller does not name one.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            TaskKind::ImportLeagues => "leagues",
            TaskKind::ImportTeams => "teams",
            TaskKind::ImportPlayers => "players",
            TaskKind::ImportFixtures => "fixtures",
            // per-player season statistics come back from the players endpoint
            TaskKind::ImportStatistics => "players",
            TaskKind::ImportStandings => "standings",
        }
    }

    pub fn default_description(&self) -> &'static str {
        match self {
            TaskKind::ImportLeagues => "Import leagues",
            TaskKind::ImportTeams => "Import teams",
            TaskKind::ImportPlayers => "Import players",
            TaskKind::ImportFixtures => "Import fixtures",
            TaskKind::ImportStatistics => "Import player statistics",
            TaskKind::ImportStandings => "Import standings",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown task kind: {s}"))
    }
}

/// Lifecycle state of a task.
///
/// Immediate ("run now") tasks stay `Pending` while they sit in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted, waiting for the Immediate Queue (or not yet registered).
    Pending,
    /// Registered with the Timer Service.
    Scheduled,
    /// Outbound call in flight.
    Running,
    /// Most recent execution succeeded.
    Completed,
    /// Most recent execution failed; never retried automatically.
    Error,
    /// Cancelled before it ran. Final.
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "scheduled" => Ok(TaskStatus::Scheduled),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Outcome counts reported by a Response Processor for one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Elements written (added + updated).
    pub processed: u32,
    pub added: u32,
    pub updated: u32,
    /// Elements rejected as malformed or unresolvable.
    pub skipped: u32,
    /// One line per skipped element, capped at [`ImportSummary::MAX_NOTES`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ImportSummary {
    pub const MAX_NOTES: usize = 50;

    pub fn record_added(&mut self) {
        self.added += 1;
        self.processed += 1;
    }

    pub fn record_updated(&mut self) {
        self.updated += 1;
        self.processed += 1;
    }

    pub fn skip(&mut self, note: impl Into<String>) {
        self.skipped += 1;
        if self.notes.len() < Self::MAX_NOTES {
            self.notes.push(note.into());
        }
    }
}

/// Persisted result of the most recent execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ImportSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn completed(summary: ImportSummary) -> Self {
        Self {
            success: true,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: None,
            error: Some(error.into()),
        }
    }
}

/// A persisted task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// API path, e.g. `fixtures` or `fixtures/statistics`.
    pub endpoint: String,
    /// Flat query parameters forwarded verbatim.
    pub parameters: BTreeMap<String, String>,
    /// First eligible firing instant. `None` means "run immediately".
    pub execution_time: Option<DateTime<Utc>>,
    /// 5-field cron expression for recurring tasks.
    pub recurrence: Option<String>,
    pub status: TaskStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// True while the task may still fire: not started yet, or a recurring
    /// definition between two firings.
    pub fn is_idle(&self) -> bool {
        match self.status {
            TaskStatus::Pending | TaskStatus::Scheduled => true,
            TaskStatus::Completed | TaskStatus::Error => self.is_recurring(),
            TaskStatus::Running | TaskStatus::Cancelled => false,
        }
    }
}

/// Caller-supplied definition for [`crate::SchedulingService::create_task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub kind: TaskKind,
    pub endpoint: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub execution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewTask {
    /// Immediate task against the kind's default endpoint.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            endpoint: kind.default_endpoint().to_string(),
            parameters: BTreeMap::new(),
            execution_time: None,
            recurrence: None,
            description: None,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, execution_time: DateTime<Utc>) -> Self {
        self.execution_time = Some(execution_time);
        self
    }

    pub fn recurring(mut self, expression: impl Into<String>) -> Self {
        self.recurrence = Some(expression.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("import_odds".parse::<TaskKind>().is_err());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("SCHEDULED".parse::<TaskStatus>().unwrap(), TaskStatus::Scheduled);
        assert!("queued".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn result_json_omits_absent_fields() {
        let ok = serde_json::to_string(&TaskResult::completed(ImportSummary::default())).unwrap();
        assert!(ok.contains(r#""success":true"#));
        assert!(!ok.contains("error"));

        let err = serde_json::to_string(&TaskResult::failed("boom")).unwrap();
        assert!(err.contains(r#""error":"boom""#));
        assert!(!err.contains("summary"));
    }

    #[test]
    fn notes_are_capped() {
        let mut summary = ImportSummary::default();
        for i in 0..(ImportSummary::MAX_NOTES + 10) {
            summary.skip(format!("bad element {i}"));
        }
        assert_eq!(summary.skipped as usize, ImportSummary::MAX_NOTES + 10);
        assert_eq!(summary.notes.len(), ImportSummary::MAX_NOTES);
    }

    #[test]
    fn recurring_definition_stays_idle_after_a_firing() {
        let now = Utc::now();
        let mut task = Task {
            id: TaskId::new(),
            kind: TaskKind::ImportFixtures,
            endpoint: "fixtures".into(),
            parameters: BTreeMap::new(),
            execution_time: Some(now),
            recurrence: Some("0 0 * * *".into()),
            status: TaskStatus::Completed,
            description: None,
            created_at: now,
            updated_at: now,
            last_run: Some(now),
            result: None,
        };
        assert!(task.is_idle());
        task.recurrence = None;
        assert!(!task.is_idle());
    }
}
