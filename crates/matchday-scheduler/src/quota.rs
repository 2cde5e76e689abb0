//! Per-day call budget plus the append-only call audit.
//!
//! Admission is two-phase. [`QuotaLedger::try_reserve`] takes an in-flight
//! slot while `used + reserved < limit`; [`QuotaLedger::record_call`] turns the
//! slot into one `used` increment and one audit row in the same IMMEDIATE
//! transaction, so concurrent executions can never overshoot the limit and
//! `used` always equals the day's audit row count.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{lock, ts, SharedConnection};
use crate::error::{Result, SchedulerError};

/// One day's counters as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

impl DailyUsage {
    fn new(date: NaiveDate, used: u32, limit: u32) -> Self {
        Self {
            date,
            used,
            limit,
            remaining: limit.saturating_sub(used),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointUsage {
    pub endpoint: String,
    pub calls: u32,
}

#[derive(Clone)]
pub struct QuotaLedger {
    conn: SharedConnection,
    /// Limit given to day rows created from now on.
    default_limit: Arc<AtomicU32>,
}

impl QuotaLedger {
    pub fn new(conn: SharedConnection, default_limit: u32) -> Self {
        Self {
            conn,
            default_limit: Arc::new(AtomicU32::new(default_limit)),
        }
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit.load(Ordering::Relaxed)
    }

    /// `max(0, limit - used)` for `day`.
    pub fn remaining(&self, day: NaiveDate) -> Result<u32> {
        Ok(self.usage(day)?.remaining)
    }

    /// Slots [`QuotaLedger::try_reserve`] would still admit for `day`:
    /// `limit - used - reserved`, floored at zero.
    pub fn available(&self, day: NaiveDate) -> Result<u32> {
        let db = lock(&self.conn)?;
        Ok(match day_row(&db, day)? {
            Some((used, limit, reserved)) => limit.saturating_sub(used).saturating_sub(reserved),
            None => self.default_limit(),
        })
    }

    pub fn usage(&self, day: NaiveDate) -> Result<DailyUsage> {
        let db = lock(&self.conn)?;
        let row = day_row(&db, day)?;
        let (used, limit) = row.map_or((0, self.default_limit()), |(u, l, _)| (u, l));
        Ok(DailyUsage::new(day, used, limit))
    }

    /// Take one in-flight slot for `day`. `false` means the day is exhausted.
    pub fn try_reserve(&self, day: NaiveDate) -> Result<bool> {
        let mut db = lock(&self.conn)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_day(&tx, day, self.default_limit())?;
        let n = tx.execute(
            "UPDATE api_quota SET reserved = reserved + 1
             WHERE day = ?1 AND used + reserved < daily_limit",
            [day.to_string()],
        )?;
        tx.commit()?;
        if n == 0 {
            debug!(%day, "quota exhausted, reservation refused");
        }
        Ok(n == 1)
    }

    /// Give back a slot that was never used for a call.
    pub fn release(&self, day: NaiveDate) -> Result<()> {
        let db = lock(&self.conn)?;
        db.execute(
            "UPDATE api_quota SET reserved = MAX(reserved - 1, 0) WHERE day = ?1",
            [day.to_string()],
        )?;
        Ok(())
    }

    /// Charge one call to `day` and append its audit row, consuming a
    /// reservation if one is held. `status` is `None` for transport faults.
    pub fn record_call(
        &self,
        day: NaiveDate,
        endpoint: &str,
        status: Option<u16>,
        requested_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut db = lock(&self.conn)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_day(&tx, day, self.default_limit())?;
        tx.execute(
            "UPDATE api_quota
             SET used = used + 1, reserved = MAX(reserved - 1, 0)
             WHERE day = ?1",
            [day.to_string()],
        )?;
        tx.execute(
            "INSERT INTO api_request_log (endpoint, status_code, requested_at, call_day)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![endpoint, status, ts(requested_at), day.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Operator override: new default for future days, applied to `today` too.
    pub fn set_limit(&self, today: NaiveDate, limit: u32) -> Result<DailyUsage> {
        if limit == 0 {
            return Err(SchedulerError::InvalidLimit(limit));
        }
        self.default_limit.store(limit, Ordering::Relaxed);
        {
            let db = lock(&self.conn)?;
            db.execute(
                "INSERT INTO api_quota (day, used, daily_limit, reserved) VALUES (?1, 0, ?2, 0)
                 ON CONFLICT(day) DO UPDATE SET daily_limit = excluded.daily_limit",
                rusqlite::params![today.to_string(), limit],
            )?;
        }
        info!(%today, limit, "daily limit changed");
        self.usage(today)
    }

    /// Recompute `used` for `day` from the audit log. Returns the new value.
    pub fn rebuild(&self, day: NaiveDate) -> Result<u32> {
        let mut db = lock(&self.conn)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_day(&tx, day, self.default_limit())?;
        let counted = audit_count_on(&tx, day)?;
        let before: u32 = tx.query_row(
            "SELECT used FROM api_quota WHERE day = ?1",
            [day.to_string()],
            |r| r.get(0),
        )?;
        tx.execute(
            "UPDATE api_quota SET used = ?2 WHERE day = ?1",
            rusqlite::params![day.to_string(), counted],
        )?;
        tx.commit()?;
        if before != counted {
            warn!(%day, before, counted, "quota counter rebuilt from audit log");
        }
        Ok(counted)
    }

    /// Drop in-flight reservations. Only valid while nothing is executing.
    pub fn clear_reservations(&self) -> Result<usize> {
        let db = lock(&self.conn)?;
        Ok(db.execute("UPDATE api_quota SET reserved = 0 WHERE reserved > 0", [])?)
    }

    /// Last `days` calendar days ending at `today`, newest first.
    pub fn daily_usage(&self, today: NaiveDate, days: u32) -> Result<Vec<DailyUsage>> {
        let db = lock(&self.conn)?;
        let mut out = Vec::with_capacity(days as usize);
        for back in 0..i64::from(days) {
            let day = today - Duration::days(back);
            let usage = match day_row(&db, day)? {
                Some((used, limit, _)) => DailyUsage::new(day, used, limit),
                None => DailyUsage::new(day, audit_count_on(&db, day)?, self.default_limit()),
            };
            out.push(usage);
        }
        Ok(out)
    }

    /// Audit counts per endpoint, busiest first.
    pub fn endpoint_usage(&self) -> Result<Vec<EndpointUsage>> {
        let db = lock(&self.conn)?;
        let mut stmt = db.prepare(
            "SELECT endpoint, COUNT(*) AS calls FROM api_request_log
             GROUP BY endpoint ORDER BY calls DESC, endpoint",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(EndpointUsage {
                    endpoint: r.get(0)?,
                    calls: r.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn audit_count(&self, day: NaiveDate) -> Result<u32> {
        let db = lock(&self.conn)?;
        Ok(audit_count_on(&db, day)?)
    }
}

fn ensure_day(conn: &Connection, day: NaiveDate, limit: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO api_quota (day, used, daily_limit, reserved) VALUES (?1, 0, ?2, 0)",
        rusqlite::params![day.to_string(), limit],
    )?;
    Ok(())
}

/// `(used, limit, reserved)` for `day`, if the row exists.
fn day_row(conn: &Connection, day: NaiveDate) -> rusqlite::Result<Option<(u32, u32, u32)>> {
    conn.query_row(
        "SELECT used, daily_limit, reserved FROM api_quota WHERE day = ?1",
        [day.to_string()],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()
}

fn audit_count_on(conn: &Connection, day: NaiveDate) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COUNT(*) FROM api_request_log WHERE call_day = ?1",
        [day.to_string()],
        |r| r.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, d, 12, 0, 0).unwrap()
    }

    fn charge(ledger: &QuotaLedger, d: u32, status: Option<u16>) {
        assert!(ledger.try_reserve(day(d)).unwrap());
        ledger.record_call(day(d), "fixtures", status, at(d)).unwrap();
    }

    #[test]
    fn fresh_day_reports_full_budget() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 100);
        assert_eq!(ledger.remaining(day(1)).unwrap(), 100);
    }

    #[test]
    fn every_outcome_is_charged() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 10);
        charge(&ledger, 1, Some(200));
        charge(&ledger, 1, Some(500));
        charge(&ledger, 1, None);
        assert_eq!(ledger.remaining(day(1)).unwrap(), 7);
        assert_eq!(ledger.audit_count(day(1)).unwrap(), 3);
        assert_eq!(ledger.remaining(day(2)).unwrap(), 10);
    }

    #[test]
    fn reservations_stop_at_the_limit() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 2);
        assert!(ledger.try_reserve(day(1)).unwrap());
        assert!(ledger.try_reserve(day(1)).unwrap());
        assert!(!ledger.try_reserve(day(1)).unwrap(), "both slots in flight");

        assert_eq!(ledger.remaining(day(1)).unwrap(), 2);
        assert_eq!(ledger.available(day(1)).unwrap(), 0);

        ledger.release(day(1)).unwrap();
        assert_eq!(ledger.available(day(1)).unwrap(), 1);
        assert!(ledger.try_reserve(day(1)).unwrap());
        ledger.record_call(day(1), "teams", Some(200), at(1)).unwrap();
        ledger.record_call(day(1), "teams", Some(200), at(1)).unwrap();
        assert!(!ledger.try_reserve(day(1)).unwrap());
        assert_eq!(ledger.remaining(day(1)).unwrap(), 0);
    }

    #[test]
    fn remaining_never_goes_negative_after_lowering_the_limit() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 5);
        for _ in 0..4 {
            charge(&ledger, 1, Some(200));
        }
        let usage = ledger.set_limit(day(1), 2).unwrap();
        assert_eq!(usage.used, 4);
        assert_eq!(usage.remaining, 0);
        assert!(!ledger.try_reserve(day(1)).unwrap());
        // the new limit also applies to the next day
        assert_eq!(ledger.remaining(day(2)).unwrap(), 2);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 5);
        assert_eq!(ledger.set_limit(day(1), 0).unwrap_err().code(), "INVALID_LIMIT");
        assert_eq!(ledger.default_limit(), 5);
    }

    #[test]
    fn rebuild_heals_a_drifted_counter() {
        let conn = open_in_memory().unwrap();
        let ledger = QuotaLedger::new(conn.clone(), 50);
        for _ in 0..3 {
            charge(&ledger, 1, Some(200));
        }
        conn.lock()
            .unwrap()
            .execute("UPDATE api_quota SET used = 40", [])
            .unwrap();
        assert_eq!(ledger.remaining(day(1)).unwrap(), 10);

        assert_eq!(ledger.rebuild(day(1)).unwrap(), 3);
        assert_eq!(ledger.remaining(day(1)).unwrap(), 47);
    }

    #[test]
    fn clearing_reservations_frees_stuck_slots() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 1);
        assert!(ledger.try_reserve(day(1)).unwrap());
        assert!(!ledger.try_reserve(day(1)).unwrap());
        assert_eq!(ledger.clear_reservations().unwrap(), 1);
        assert!(ledger.try_reserve(day(1)).unwrap());
    }

    #[test]
    fn usage_reports() {
        let ledger = QuotaLedger::new(open_in_memory().unwrap(), 100);
        charge(&ledger, 1, Some(200));
        charge(&ledger, 3, Some(200));
        assert!(ledger.try_reserve(day(3)).unwrap());
        ledger.record_call(day(3), "standings", Some(200), at(3)).unwrap();

        let days = ledger.daily_usage(day(3), 3).unwrap();
        let used: Vec<(NaiveDate, u32)> = days.iter().map(|u| (u.date, u.used)).collect();
        assert_eq!(used, vec![(day(3), 2), (day(2), 0), (day(1), 1)]);

        let endpoints = ledger.endpoint_usage().unwrap();
        assert_eq!(endpoints[0], EndpointUsage { endpoint: "fixtures".into(), calls: 2 });
        assert_eq!(endpoints[1], EndpointUsage { endpoint: "standings".into(), calls: 1 });
    }
}
