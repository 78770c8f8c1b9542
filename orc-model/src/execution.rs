use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ErrorKind, FailureDigest, TaskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Why a `Cancelled` execution stopped (spec §7, "User-visible behavior").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    WorkflowTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded
                | TaskStatus::Failed
                | TaskStatus::Skipped
                | TaskStatus::Cancelled
        )
    }
}

/// Why a task was `skipped` (spec §3, `TaskState` invariants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamFailed { task: String },
    ConditionFalse,
}

/// The lifecycle record of one task within one execution (spec §3,
/// `TaskState`). Once a field group reaches a terminal status the
/// `status`/`endedAt`/`output`/`error` quadruple is never mutated again —
/// enforced by `WorkflowRuntime`/`ExecutionStore`, not by this type, since
/// write-once-ness is a property of *how* it's stored, not its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error: Option<TaskError>,
    pub elapsed_ms: Option<u64>,
    pub skip_reason: Option<SkipReason>,
    /// Set when this task's `onError = fallback([...])` list ran and at
    /// least one fallback succeeded (spec §4.5).
    #[serde(default)]
    pub recovered: bool,
}

impl TaskState {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            attempt: 0,
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
            elapsed_ms: None,
            skip_reason: None,
            recovered: false,
        }
    }

    /// A task joins the `Ready` set (spec §4.6) once its predecessors are
    /// satisfied but before a concurrency slot opens up for it to actually
    /// dispatch.
    pub fn mark_ready(&mut self) {
        self.status = TaskStatus::Ready;
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.attempt += 1;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn mark_succeeded(&mut self, output: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Succeeded;
        self.output = Some(output);
        self.finish(now);
    }

    pub fn mark_failed(&mut self, error: TaskError, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.finish(now);
    }

    pub fn mark_skipped(&mut self, reason: SkipReason, now: DateTime<Utc>) {
        self.status = TaskStatus::Skipped;
        self.skip_reason = Some(reason);
        self.output = Some(Value::Null);
        self.finish(now);
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.finish(now);
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.ended_at = Some(now);
        if let Some(started) = self.started_at {
            self.elapsed_ms = Some((now - started).num_milliseconds().max(0) as u64);
        }
    }
}

/// One instantiation of a workflow (spec §3, `Execution`). Owns its
/// `TaskState`s exclusively; mutated only by its owning `WorkflowRuntime`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u64,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: Value,
    pub task_states: HashMap<String, TaskState>,
    pub failure_digest: Option<FailureDigest>,
    pub cancel_reason: Option<CancelReason>,
}

impl Execution {
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>, workflow_version: u64, input: Value) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            workflow_version,
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            input,
            task_states: HashMap::new(),
            failure_digest: None,
            cancel_reason: None,
        }
    }

    /// Records the first failing task as the execution's failure digest
    /// (spec §7); later failures do not overwrite it.
    pub fn note_failure(&mut self, task_name: &str, error: &TaskError) {
        if self.failure_digest.is_none() {
            self.failure_digest = Some(FailureDigest {
                task_name: task_name.to_string(),
                kind: error.kind,
                message: error.message.clone(),
            });
        }
    }
}

/// A result returned by an agent's `execute(action, params)` (spec §4.1,
/// §6 "Agent surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub ok: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

impl AgentOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error_kind: None,
            message: None,
            retryable: false,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            ok: false,
            data: None,
            error_kind: Some(kind),
            message: Some(message.into()),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn mark_running_increments_attempt_and_sets_started_at_once() {
        let t0 = Utc::now();
        let mut state = TaskState::pending("fetch");
        state.mark_running(t0);
        assert_eq!(state.attempt, 1);
        assert_eq!(state.started_at, Some(t0));

        let t1 = t0 + ChronoDuration::seconds(5);
        state.mark_running(t1);
        assert_eq!(state.attempt, 2);
        // started_at is set on first run only, not overwritten on retry.
        assert_eq!(state.started_at, Some(t0));
    }

    #[test]
    fn mark_succeeded_computes_elapsed_and_stores_output() {
        let t0 = Utc::now();
        let mut state = TaskState::pending("fetch");
        state.mark_running(t0);
        let t1 = t0 + ChronoDuration::milliseconds(250);
        state.mark_succeeded(serde_json::json!({"ok": true}), t1);
        assert_eq!(state.status, TaskStatus::Succeeded);
        assert_eq!(state.elapsed_ms, Some(250));
        assert_eq!(state.output, Some(serde_json::json!({"ok": true})));
        assert!(state.error.is_none());
    }

    #[test]
    fn mark_failed_records_error_and_elapsed() {
        let t0 = Utc::now();
        let mut state = TaskState::pending("fetch");
        state.mark_running(t0);
        let t1 = t0 + ChronoDuration::milliseconds(100);
        let err = TaskError::new(ErrorKind::Timeout, "deadline exceeded");
        state.mark_failed(err, t1);
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.elapsed_ms, Some(100));
        assert_eq!(state.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[test]
    fn mark_skipped_sets_null_output_and_reason() {
        let mut state = TaskState::pending("fetch");
        let now = Utc::now();
        state.mark_skipped(SkipReason::UpstreamFailed { task: "a".into() }, now);
        assert_eq!(state.status, TaskStatus::Skipped);
        assert_eq!(state.output, Some(Value::Null));
        assert!(matches!(state.skip_reason, Some(SkipReason::UpstreamFailed { .. })));
    }

    #[test]
    fn mark_cancelled_without_start_leaves_elapsed_unset() {
        let mut state = TaskState::pending("fetch");
        state.mark_cancelled(Utc::now());
        assert_eq!(state.status, TaskStatus::Cancelled);
        assert!(state.elapsed_ms.is_none());
    }

    #[test]
    fn note_failure_keeps_first_digest_only() {
        let mut exec = Execution::new("exec-1", "wf-1", 1, Value::Null);
        let first = TaskError::new(ErrorKind::Timeout, "first failure");
        let second = TaskError::new(ErrorKind::PermanentAgentError, "second failure");
        exec.note_failure("a", &first);
        exec.note_failure("b", &second);
        let digest = exec.failure_digest.unwrap();
        assert_eq!(digest.task_name, "a");
        assert_eq!(digest.kind, ErrorKind::Timeout);
    }
}
