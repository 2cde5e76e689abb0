//! 5-field cron expressions: minute, hour, day-of-month, month, day-of-week.
//!
//! Each field is `*`, a literal, or a comma-separated set whose items may
//! also be ranges (`a-b`) and steps (`*/n`, `a-b/n`, `a/n`). Day-of-week uses
//! 0 or 7 for Sunday. All five fields must match (day-of-month and
//! day-of-week are ANDed). Matching happens in the server [`Calendar`].

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};

use crate::clock::Calendar;
use crate::error::SchedulerError;

/// Search horizon for the next firing. Covers leap-day-only expressions.
const MAX_SEARCH_DAYS: i64 = 366 * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Unit {
    const ORDER: [Unit; 5] = [
        Unit::Minute,
        Unit::Hour,
        Unit::DayOfMonth,
        Unit::Month,
        Unit::DayOfWeek,
    ];

    fn name(self) -> &'static str {
        match self {
            Unit::Minute => "minute",
            Unit::Hour => "hour",
            Unit::DayOfMonth => "day-of-month",
            Unit::Month => "month",
            Unit::DayOfWeek => "day-of-week",
        }
    }

    /// Inclusive bounds accepted in the source text.
    fn bounds(self) -> (u32, u32) {
        match self {
            Unit::Minute => (0, 59),
            Unit::Hour => (0, 23),
            Unit::DayOfMonth => (1, 31),
            Unit::Month => (1, 12),
            Unit::DayOfWeek => (0, 7),
        }
    }
}

/// One parsed field: the source token plus the set of matching values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    raw: String,
    mask: u64,
}

impl Field {
    fn parse(unit: Unit, raw: &str) -> Result<Self, SchedulerError> {
        let (lo, hi) = unit.bounds();
        let mut mask = 0u64;

        for item in raw.split(',') {
            let bad = |why: &str| {
                SchedulerError::InvalidSchedule(format!(
                    "{} field `{raw}`: {why}",
                    unit.name()
                ))
            };
            if item.is_empty() {
                return Err(bad("empty list item"));
            }

            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| bad("step is not a number"))?;
                    if step == 0 {
                        return Err(bad("step must be positive"));
                    }
                    (range, step)
                }
                None => (item, 1),
            };

            let (start, end) = if range == "*" {
                (lo, hi)
            } else if let Some((a, b)) = range.split_once('-') {
                let a = parse_value(a).ok_or_else(|| bad("range start is not a number"))?;
                let b = parse_value(b).ok_or_else(|| bad("range end is not a number"))?;
                if a > b {
                    return Err(bad("range is reversed"));
                }
                (a, b)
            } else {
                let v = parse_value(range).ok_or_else(|| bad("value is not a number"))?;
                // `a/n` runs from a to the top of the field
                if item.contains('/') {
                    (v, hi)
                } else {
                    (v, v)
                }
            };

            if start < lo || end > hi {
                return Err(bad(&format!("values must be within {lo}-{hi}")));
            }

            let mut v = start;
            while v <= end {
                let bit = if unit == Unit::DayOfWeek && v == 7 { 0 } else { v };
                mask |= 1 << bit;
                v = match v.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            mask,
        })
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.mask & (1 << value) != 0
    }

    fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(move |v| self.contains(*v))
    }
}

fn parse_value(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// A parsed recurrence expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    fields: [Field; 5],
}

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        expression.parse()
    }

    /// The five source tokens, in order.
    pub fn fields(&self) -> [&str; 5] {
        [
            self.fields[0].raw.as_str(),
            self.fields[1].raw.as_str(),
            self.fields[2].raw.as_str(),
            self.fields[3].raw.as_str(),
            self.fields[4].raw.as_str(),
        ]
    }

    fn minute(&self) -> &Field {
        &self.fields[0]
    }
    fn hour(&self) -> &Field {
        &self.fields[1]
    }
    fn day_of_month(&self) -> &Field {
        &self.fields[2]
    }
    fn month(&self) -> &Field {
        &self.fields[3]
    }
    fn day_of_week(&self) -> &Field {
        &self.fields[4]
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.month().contains(date.month())
            && self.day_of_month().contains(date.day())
            && self.day_of_week().contains(date.weekday().num_days_from_sunday())
    }

    /// Whether the minute containing `t` is a firing instant.
    pub fn matches(&self, t: DateTime<Utc>, calendar: &Calendar) -> bool {
        let local = calendar.local(t).naive_local();
        self.matches_date(local.date())
            && self.hour().contains(local.hour())
            && self.minute().contains(local.minute())
    }

    /// First firing instant at or after `from`.
    ///
    /// A `from` that is not on a whole minute rounds up to the next minute.
    /// Returns `None` when nothing matches within the search horizon
    /// (e.g. `0 0 30 2 *`).
    pub fn next_at_or_after(
        &self,
        from: DateTime<Utc>,
        calendar: &Calendar,
    ) -> Option<DateTime<Utc>> {
        let local = calendar.local(from).naive_local();
        let truncated = local.with_second(0)?.with_nanosecond(0)?;
        let start = if truncated < local {
            truncated + Duration::minutes(1)
        } else {
            truncated
        };

        let first_day = start.date();
        for offset in 0..MAX_SEARCH_DAYS {
            let date = first_day + Duration::days(offset);
            if !self.matches_date(date) {
                continue;
            }
            let same_day = offset == 0;
            for hour in self.hour().values() {
                if same_day && hour < start.hour() {
                    continue;
                }
                for minute in self.minute().values() {
                    if same_day && hour == start.hour() && minute < start.minute() {
                        continue;
                    }
                    let naive = NaiveDateTime::new(date, chrono::NaiveTime::from_hms_opt(hour, minute, 0)?);
                    let fired = calendar.offset().from_local_datetime(&naive).single()?;
                    return Some(fired.with_timezone(&Utc));
                }
            }
        }
        None
    }

    /// First firing instant strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, calendar: &Calendar) -> Option<DateTime<Utc>> {
        let local = calendar.local(after).naive_local();
        let floor = local.with_second(0)?.with_nanosecond(0)?;
        let bump = floor + Duration::minutes(1);
        let next_minute = calendar.offset().from_local_datetime(&bump).single()?;
        self.next_at_or_after(next_minute.with_timezone(&Utc), calendar)
    }
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "expected 5 cron fields (minute hour day month weekday), got {}",
                parts.len()
            )));
        }
        let mut fields = Vec::with_capacity(5);
        for (unit, raw) in Unit::ORDER.into_iter().zip(parts) {
            fields.push(Field::parse(unit, raw)?);
        }
        let fields: [Field; 5] = fields
            .try_into()
            .map_err(|_| SchedulerError::InvalidSchedule("expected 5 cron fields".into()))?;
        Ok(Self { fields })
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fields().join(" "))
    }
}
