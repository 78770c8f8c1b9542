//! Converts cron specs and manual/webhook triggers into runtime invocations,
//! surviving restarts via a persisted leader lease and per-slot dedup (spec
//! §4.8, the Scheduler).

mod cron_schedule;
mod error;
mod scheduler;
mod sink;

pub use crate::cron_schedule::CronSchedule;
pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
pub use sink::{EnqueueError, TriggerOrigin, TriggerSink};
