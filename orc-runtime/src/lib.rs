//! Drives workflow executions to terminal state (spec §4.5, §4.6).
//!
//! `executor::execute_task` runs a single task through condition evaluation,
//! parameter resolution, agent dispatch, and the retry/timeout/circuit
//! breaker policy. `runtime::WorkflowRuntime` drives an entire `Execution`'s
//! ready-set scheduling loop on top of it, persisting every state
//! transition through an `orc-store::ExecutionStore` as it goes.

mod error;
mod executor;
mod runtime;

pub use error::{Result, RuntimeError};
pub use executor::{execute_task, TaskOutcome};
pub use runtime::WorkflowRuntime;
