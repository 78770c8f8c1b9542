//! Durable persistence for the workflow orchestration core (spec §3, §4.7).
//!
//! Everything the runtime and scheduler need to survive a restart lives
//! behind the `ExecutionStore` trait: workflow templates, executions, their
//! task states, cron schedules, fire dedup records, and the scheduler's
//! leader lease. `SledStore` is the embedded, crash-safe implementation.

mod error;
mod store;

pub use error::{Result, StoreError};
pub use store::{ExecutionStore, SledStore};
