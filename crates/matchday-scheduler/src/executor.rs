use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::{Calendar, Clock};
use crate::error::Result;
use crate::processor::{dispatch, ResponseProcessor};
use crate::quota::QuotaLedger;
use crate::store::TaskStore;
use crate::transport::{ApiResponse, ApiTransport, TransportError};
use crate::types::{ImportSummary, Task, TaskId, TaskResult, TaskStatus};

/// Longest slice of an error body kept in a task result.
const BODY_SNIPPET: usize = 200;

/// What one execution attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Call made, payload processed, task COMPLETED.
    Completed(ImportSummary),
    /// Call made (or attempted) and the task ended in ERROR.
    Failed(String),
    /// Today's quota is used up. No call, no state change.
    Deferred,
    /// The task was no longer idle (cancelled, running, or finished).
    Skipped,
}

/// Runs one due task: admission, outbound call, accounting, processing,
/// final status.
pub struct Executor {
    store: TaskStore,
    quota: QuotaLedger,
    transport: Arc<dyn ApiTransport>,
    processor: Arc<dyn ResponseProcessor>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
}

impl Executor {
    pub fn new(
        store: TaskStore,
        quota: QuotaLedger,
        transport: Arc<dyn ApiTransport>,
        processor: Arc<dyn ResponseProcessor>,
        clock: Arc<dyn Clock>,
        calendar: Calendar,
    ) -> Self {
        Self {
            store,
            quota,
            transport,
            processor,
            clock,
            calendar,
        }
    }

    pub async fn execute(&self, id: &TaskId) -> Result<ExecutionOutcome> {
        let task = self.store.get(id)?;
        if !task.is_idle() {
            debug!(task_id = %id, status = %task.status, "task not idle, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }

        let now = self.clock.now();
        let day = self.calendar.day(now);
        if !self.quota.try_reserve(day)? {
            info!(task_id = %id, %day, "daily quota exhausted, deferring task");
            return Ok(ExecutionOutcome::Deferred);
        }

        if !self.store.claim_running(id, now)? {
            self.quota.release(day)?;
            debug!(task_id = %id, "lost the claim, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }

        info!(
            task_id = %id,
            kind = %task.kind,
            endpoint = %task.endpoint,
            "executing task"
        );

        let (outcome, status, result) = match self.run_claimed(&task, day, now).await {
            Ok(summary) => {
                info!(
                    task_id = %id,
                    processed = summary.processed,
                    skipped = summary.skipped,
                    "task completed"
                );
                let result = TaskResult::completed(summary.clone());
                (ExecutionOutcome::Completed(summary), TaskStatus::Completed, result)
            }
            Err(message) => {
                warn!(task_id = %id, error = %message, "task failed");
                let result = TaskResult::failed(message.clone());
                (ExecutionOutcome::Failed(message), TaskStatus::Error, result)
            }
        };
        if let Err(e) = self.store.finish(id, status, &result, self.clock.now()) {
            // the row stays RUNNING until recovery fails it on the next start
            error!(task_id = %id, %status, error = %e, "failed to store task result");
        }
        Ok(outcome)
    }

    /// Everything after the RUNNING claim: the call, its accounting, and
    /// processing. Every path yields a terminal result so the task is never
    /// left RUNNING.
    async fn run_claimed(
        &self,
        task: &Task,
        day: NaiveDate,
        requested_at: DateTime<Utc>,
    ) -> std::result::Result<ImportSummary, String> {
        let limit = self.transport.timeout();
        let response = match tokio::time::timeout(
            limit,
            self.transport.get(&task.endpoint, &task.parameters),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(TransportError::Timeout(limit)),
        };

        let status_code = response.as_ref().ok().map(|r| r.status);
        if let Err(e) = self
            .quota
            .record_call(day, &task.endpoint, status_code, requested_at)
        {
            error!(task_id = %task.id, error = %e, "failed to record API call");
            if let Err(e) = self.quota.release(day) {
                error!(task_id = %task.id, %day, error = %e, "failed to release quota reservation");
            }
            return Err(format!("failed to record API call: {e}"));
        }

        let items = payload_items(response)?;
        dispatch(self.processor.as_ref(), task.kind, &items)
            .map_err(|e| format!("processing failed: {e}"))
    }
}

/// Classify a call result into the batch to process or an error message.
fn payload_items(
    response: std::result::Result<ApiResponse, TransportError>,
) -> std::result::Result<Vec<Value>, String> {
    let response = response.map_err(|e| e.to_string())?;
    if !response.is_success() {
        return Err(format!(
            "HTTP {}: {}",
            response.status,
            snippet(&response.body)
        ));
    }

    let body: Value = serde_json::from_str(&response.body)
        .map_err(|e| format!("malformed response body: {e}"))?;

    if let Some(errors) = body.get("errors") {
        let has_errors = match errors {
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::Null => false,
            _ => true,
        };
        if has_errors {
            return Err(format!("API reported errors: {errors}"));
        }
    }

    match body.get("response") {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(obj @ Value::Object(_)) => Ok(vec![obj.clone()]),
        Some(other) => Err(format!("unexpected `response` type: {}", type_name(other))),
        None => Err("payload has no `response` field".to_string()),
    }
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(BODY_SNIPPET) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::clock::ManualClock;
    use crate::db::open_in_memory;
    use crate::processor::ProcessError;
    use crate::types::TaskKind;

    struct Scripted {
        replies: Mutex<VecDeque<std::result::Result<ApiResponse, TransportError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<std::result::Result<ApiResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(body: &str) -> std::result::Result<ApiResponse, TransportError> {
            Ok(ApiResponse {
                status: 200,
                body: body.to_string(),
            })
        }
    }

    #[async_trait]
    impl ApiTransport for Scripted {
        async fn get(
            &self,
            _endpoint: &str,
            _params: &BTreeMap<String, String>,
        ) -> std::result::Result<ApiResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Scripted::ok(r#"{"response":[]}"#))
        }

        fn has_credential(&self) -> bool {
            true
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(30)
        }
    }

    /// Counts elements; an element `{"bad": true}` is skipped, `{"explode": true}` fails the batch.
    struct Counting;

    impl Counting {
        fn run(&self, items: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
            let mut s = ImportSummary::default();
            for item in items {
                if item.get("explode").is_some() {
                    return Err(ProcessError::new("disk full"));
                }
                if item.get("bad").is_some() {
                    s.skip("bad element");
                } else {
                    s.record_added();
                }
            }
            Ok(s)
        }
    }

    impl ResponseProcessor for Counting {
        fn import_leagues(&self, i: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
            self.run(i)
        }
        fn import_teams(&self, i: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
            self.run(i)
        }
        fn import_players(&self, i: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
            self.run(i)
        }
        fn import_fixtures(&self, i: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
            self.run(i)
        }
        fn import_statistics(
            &self,
            i: &[Value],
        ) -> std::result::Result<ImportSummary, ProcessError> {
            self.run(i)
        }
        fn import_standings(&self, i: &[Value]) -> std::result::Result<ImportSummary, ProcessError> {
            self.run(i)
        }
    }

    struct Fixture {
        conn: crate::db::SharedConnection,
        store: TaskStore,
        quota: QuotaLedger,
        executor: Executor,
        transport: Arc<Scripted>,
    }

    fn fixture(limit: u32, replies: Vec<std::result::Result<ApiResponse, TransportError>>) -> Fixture {
        let conn = open_in_memory().unwrap();
        let store = TaskStore::new(conn.clone());
        let quota = QuotaLedger::new(conn.clone(), limit);
        let transport = Scripted::new(replies);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap(),
        ));
        let executor = Executor::new(
            store.clone(),
            quota.clone(),
            transport.clone(),
            Arc::new(Counting),
            clock,
            Calendar::utc(),
        );
        Fixture {
            conn,
            store,
            quota,
            executor,
            transport,
        }
    }

    fn pending(store: &TaskStore) -> TaskId {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let task = Task {
            id: TaskId::new(),
            kind: TaskKind::ImportTeams,
            endpoint: "teams".into(),
            parameters: BTreeMap::new(),
            execution_time: None,
            recurrence: None,
            status: TaskStatus::Pending,
            description: None,
            created_at: now,
            updated_at: now,
            last_run: None,
            result: None,
        };
        store.insert(&task).unwrap();
        task.id
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
    }

    #[tokio::test]
    async fn success_completes_with_summary_and_charges_quota() {
        let f = fixture(
            10,
            vec![Scripted::ok(
                r#"{"errors":[],"results":3,"response":[{"id":1},{"bad":true},{"id":2}]}"#,
            )],
        );
        let id = pending(&f.store);

        let outcome = f.executor.execute(&id).await.unwrap();
        let ExecutionOutcome::Completed(summary) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!((summary.processed, summary.skipped), (2, 1));

        let task = f.store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.last_run.is_some());
        assert!(task.result.unwrap().success);
        assert_eq!(f.quota.remaining(today()).unwrap(), 9);
        assert_eq!(f.quota.audit_count(today()).unwrap(), 1);
    }

    #[tokio::test]
    async fn single_object_response_is_a_batch_of_one() {
        let f = fixture(10, vec![Scripted::ok(r#"{"response":{"id":7}}"#)]);
        let id = pending(&f.store);
        let outcome = f.executor.execute(&id).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(s) if s.added == 1));
    }

    #[tokio::test]
    async fn failures_are_terminal_and_still_charged() {
        let cases: Vec<(std::result::Result<ApiResponse, TransportError>, &str)> = vec![
            (
                Err(TransportError::Connect("refused".into())),
                "connection failed",
            ),
            (
                Ok(ApiResponse {
                    status: 503,
                    body: "upstream down".into(),
                }),
                "HTTP 503",
            ),
            (Scripted::ok("<html>oops</html>"), "malformed response body"),
            (
                Scripted::ok(r#"{"errors":{"requests":"limit reached"},"response":[]}"#),
                "API reported errors",
            ),
            (Scripted::ok(r#"{"results":0}"#), "no `response` field"),
            (
                Scripted::ok(r#"{"response":[{"explode":true}]}"#),
                "processing failed: disk full",
            ),
        ];
        let n = cases.len() as u32;
        let (replies, expected): (Vec<_>, Vec<_>) = cases.into_iter().unzip();
        let f = fixture(100, replies);

        for needle in expected {
            let id = pending(&f.store);
            let outcome = f.executor.execute(&id).await.unwrap();
            let ExecutionOutcome::Failed(message) = outcome else {
                panic!("expected failure for {needle}, got {outcome:?}");
            };
            assert!(message.contains(needle), "{message} should mention {needle}");

            let task = f.store.get(&id).unwrap();
            assert_eq!(task.status, TaskStatus::Error);
            assert_eq!(task.result.unwrap().error.as_deref(), Some(message.as_str()));
        }
        assert_eq!(f.quota.audit_count(today()).unwrap(), n);
        assert_eq!(f.quota.remaining(today()).unwrap(), 100 - n);
    }

    #[tokio::test]
    async fn exhausted_quota_defers_without_calling() {
        let f = fixture(1, vec![]);
        let first = pending(&f.store);
        let second = pending(&f.store);

        assert!(matches!(
            f.executor.execute(&first).await.unwrap(),
            ExecutionOutcome::Completed(_)
        ));
        assert_eq!(
            f.executor.execute(&second).await.unwrap(),
            ExecutionOutcome::Deferred
        );
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.get(&second).unwrap().status, TaskStatus::Pending);
        assert_eq!(f.quota.audit_count(today()).unwrap(), 1);
    }

    #[tokio::test]
    async fn finished_or_cancelled_tasks_are_skipped() {
        let f = fixture(10, vec![]);
        let done = pending(&f.store);
        f.executor.execute(&done).await.unwrap();
        assert_eq!(
            f.executor.execute(&done).await.unwrap(),
            ExecutionOutcome::Skipped
        );

        let cancelled = pending(&f.store);
        f.store.cancel(&cancelled, Utc::now()).unwrap();
        assert_eq!(
            f.executor.execute(&cancelled).await.unwrap(),
            ExecutionOutcome::Skipped
        );
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.quota.remaining(today()).unwrap(), 9);
    }

    /// Answers like the real API, but breaks the audit table mid-call.
    struct DropsAuditLog {
        conn: crate::db::SharedConnection,
    }

    #[async_trait]
    impl ApiTransport for DropsAuditLog {
        async fn get(
            &self,
            _endpoint: &str,
            _params: &BTreeMap<String, String>,
        ) -> std::result::Result<ApiResponse, TransportError> {
            self.conn
                .lock()
                .unwrap()
                .execute_batch("DROP TABLE api_request_log")
                .unwrap();
            Scripted::ok(r#"{"response":[]}"#)
        }

        fn has_credential(&self) -> bool {
            true
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(30)
        }
    }

    #[tokio::test]
    async fn failed_accounting_gives_the_reservation_back() {
        let conn = open_in_memory().unwrap();
        let store = TaskStore::new(conn.clone());
        let quota = QuotaLedger::new(conn.clone(), 1);
        let executor = Executor::new(
            store.clone(),
            quota.clone(),
            Arc::new(DropsAuditLog { conn }),
            Arc::new(Counting),
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap(),
            )),
            Calendar::utc(),
        );
        let id = pending(&store);

        let outcome = executor.execute(&id).await.unwrap();
        assert!(
            matches!(&outcome, ExecutionOutcome::Failed(m) if m.contains("failed to record API call")),
            "{outcome:?}"
        );
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Error);
        assert_eq!(quota.available(today()).unwrap(), 1);
        assert!(quota.try_reserve(today()).unwrap(), "the only slot is free again");
    }

    #[tokio::test]
    async fn unstorable_result_still_reports_the_outcome() {
        let f = fixture(10, vec![]);
        let id = pending(&f.store);
        f.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_completion BEFORE UPDATE ON tasks
                 WHEN NEW.status = 'completed'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let outcome = f.executor.execute(&id).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        assert_eq!(f.store.get(&id).unwrap().status, TaskStatus::Running);
        assert_eq!(f.quota.remaining(today()).unwrap(), 9);
        assert_eq!(f.quota.available(today()).unwrap(), 9);
    }

    #[test]
    fn error_snippet_is_bounded() {
        let long = "x".repeat(1_000);
        assert_eq!(snippet(&long).len(), BODY_SNIPPET);
        assert_eq!(snippet("  short  "), "short");
    }
}
