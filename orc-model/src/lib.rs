//! Shared data model for the workflow orchestration core.
//!
//! Every other crate in this workspace depends on this one for its
//! vocabulary — `Workflow`, `TaskSpec`, `Execution`, `TaskState`, the closed
//! `ErrorKind` set, and the scheduler's `ScheduleEntry`/`SchedulerLease` —
//! so that the planner, executor, runtime, store, and scheduler agree on one
//! set of types rather than each defining their own.

mod agent;
mod config;
mod error;
mod execution;
mod schedule;
mod workflow;

pub use agent::{ActionSpec, AgentDescriptorInfo};
pub use config::OrchestratorConfig;
pub use error::{ErrorKind, FailureDigest, TaskError};
pub use execution::{
    AgentOutcome, CancelReason, Execution, ExecutionStatus, SkipReason, TaskState, TaskStatus,
};
pub use schedule::{CircuitState, ScheduleEntry, SchedulerLease};
pub use workflow::{
    OnError, RetryPolicy, TaskSpec, Trigger, Workflow, WorkflowConfig, WorkflowValidationError,
};
