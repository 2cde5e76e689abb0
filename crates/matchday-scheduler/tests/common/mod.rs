#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use matchday_core::config::SchedulerConfig;
use matchday_scheduler::db::{open_in_memory, SharedConnection};
use matchday_scheduler::{
    ApiResponse, ApiTransport, ImportSummary, ManualClock, ProcessError, ResponseProcessor,
    SchedulingService, TransportError,
};

pub const OK_BODY: &str = r#"{"errors":[],"results":2,"response":[{"id":1},{"id":2}]}"#;

/// Scripted API: pops queued replies, then answers `OK_BODY`.
pub struct FakeApi {
    replies: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    credential: bool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, true)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(delay, true)
    }

    pub fn without_credential() -> Arc<Self> {
        Self::build(Duration::ZERO, false)
    }

    fn build(delay: Duration, credential: bool) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay,
            credential,
        })
    }

    pub fn reply(&self, status: u16, body: &str) {
        self.replies.lock().unwrap().push_back(Ok(ApiResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiTransport for FakeApi {
    async fn get(
        &self,
        endpoint: &str,
        _params: &BTreeMap<String, String>,
    ) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ApiResponse {
                status: 200,
                body: OK_BODY.to_string(),
            })
        })
    }

    fn has_credential(&self) -> bool {
        self.credential
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Adds every element and remembers the batch sizes it saw.
#[derive(Default)]
pub struct CountingProcessor {
    pub batches: Mutex<Vec<usize>>,
}

impl CountingProcessor {
    fn take(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.batches.lock().unwrap().push(items.len());
        let mut summary = ImportSummary::default();
        for _ in items {
            summary.record_added();
        }
        Ok(summary)
    }
}

impl ResponseProcessor for CountingProcessor {
    fn import_leagues(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.take(items)
    }
    fn import_teams(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.take(items)
    }
    fn import_players(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.take(items)
    }
    fn import_fixtures(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.take(items)
    }
    fn import_statistics(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.take(items)
    }
    fn import_standings(&self, items: &[Value]) -> Result<ImportSummary, ProcessError> {
        self.take(items)
    }
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub struct Harness {
    pub conn: SharedConnection,
    pub clock: Arc<ManualClock>,
    pub api: Arc<FakeApi>,
    pub service: SchedulingService,
}

impl Harness {
    pub fn new(start: DateTime<Utc>, daily_limit: u32) -> Self {
        Self::with_api(start, daily_limit, FakeApi::new())
    }

    pub fn with_api(start: DateTime<Utc>, daily_limit: u32, api: Arc<FakeApi>) -> Self {
        let conn = open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let service = build(&conn, &clock, &api, daily_limit);
        Self {
            conn,
            clock,
            api,
            service,
        }
    }

    /// A fresh service over the same database, as after a process restart.
    pub fn restart(&mut self, daily_limit: u32) {
        self.service = build(&self.conn, &self.clock, &self.api, daily_limit);
    }
}

fn build(
    conn: &SharedConnection,
    clock: &Arc<ManualClock>,
    api: &Arc<FakeApi>,
    daily_limit: u32,
) -> SchedulingService {
    let config = SchedulerConfig {
        daily_limit,
        politeness_delay_ms: 0,
        queue_poll_secs: 1,
        quota_recheck_secs: 300,
        ..Default::default()
    };
    SchedulingService::new(
        conn.clone(),
        clock.clone(),
        api.clone(),
        Arc::new(CountingProcessor::default()),
        &config,
    )
}
