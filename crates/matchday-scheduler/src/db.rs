use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{Result, SchedulerError};

/// One SQLite connection shared by the store, the ledger and the executor.
///
/// Every mutation runs inside a SQLite transaction while the guard is held;
/// the guard is never held across an `.await`.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Initialise the scheduler schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT    NOT NULL PRIMARY KEY,
            kind            TEXT    NOT NULL,
            endpoint        TEXT    NOT NULL,
            parameters      TEXT    NOT NULL,   -- JSON object of strings
            execution_time  TEXT,               -- RFC 3339 UTC or NULL (run now)
            recurrence      TEXT,               -- 5-field cron or NULL
            status          TEXT    NOT NULL DEFAULT 'pending',
            description     TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            last_run        TEXT,
            result          TEXT                -- JSON TaskResult or NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, created_at);

        -- One row per calendar day, created lazily on the first call of the day.
        CREATE TABLE IF NOT EXISTS api_quota (
            day          TEXT    NOT NULL PRIMARY KEY,   -- YYYY-MM-DD
            used         INTEGER NOT NULL DEFAULT 0,
            daily_limit  INTEGER NOT NULL,
            reserved     INTEGER NOT NULL DEFAULT 0      -- admitted calls still in flight
        ) STRICT;

        -- Append-only audit of every outbound call; the ledger of record for `used`.
        CREATE TABLE IF NOT EXISTS api_request_log (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint      TEXT    NOT NULL,
            status_code   INTEGER,                       -- NULL on transport faults
            requested_at  TEXT    NOT NULL,
            call_day      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_request_log_day ON api_request_log (call_day);
        CREATE INDEX IF NOT EXISTS idx_request_log_endpoint ON api_request_log (endpoint);
        ",
    )?;
    Ok(())
}

/// Open (or create) the database file and initialise the schema.
pub fn open(path: &str) -> Result<SharedConnection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Private in-memory database, used by tests and dry runs.
pub fn open_in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| SchedulerError::StorePoisoned)
}

/// Fixed-width RFC 3339 so lexical order equals chronological order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('tasks', 'api_quota', 'api_request_log')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(ts(a) < ts(b));
        assert_eq!(parse_ts(&ts(a)).unwrap(), a);
    }
}
