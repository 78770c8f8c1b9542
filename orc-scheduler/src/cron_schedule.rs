use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// A parsed five-field cron expression bound to a timezone, evaluated
/// always in that timezone (spec §4.8, "Cron grammar").
pub struct CronSchedule {
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    /// Parses the spec's five-field `m h dom mon dow` expression. The
    /// underlying `cron` crate speaks the seconds-prefixed six-field form,
    /// so a literal `"0 "` is prepended before handing the expression to
    /// it — the public grammar stays exactly what spec §4.8 documents.
    pub fn parse(expr: &str, timezone: &str) -> Result<Self> {
        let six_field = format!("0 {}", expr.trim());
        let schedule = Schedule::from_str(&six_field)
            .map_err(|err| SchedulerError::InvalidCron(expr.to_string(), err.to_string()))?;
        let tz: Tz = timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))?;
        Ok(Self { schedule, tz })
    }

    /// The next instant strictly after `after`, in the schedule's
    /// timezone. Used both to seed a freshly-created `ScheduleEntry` and to
    /// advance `nextFireAt` after a fire (spec §4.8 step 2).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.schedule.after(&local).next().map(|dt| dt.with_timezone(&Utc))
    }

    /// How many scheduled instants fall strictly between `from` (exclusive)
    /// and `to` (exclusive) — used only to report how many fires were
    /// coalesced away (spec §4.8 step 3), capped so a long-dead process
    /// doesn't spend forever counting.
    pub fn count_missed_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
        const CAP: usize = 10_000;
        let from_local = from.with_timezone(&self.tz);
        self.schedule
            .after(&from_local)
            .take(CAP)
            .take_while(|dt| dt.with_timezone(&Utc) < to)
            .count()
    }
}
