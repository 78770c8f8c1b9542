use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ErrorKind;

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Cron { expr: String, tz: String },
    Webhook,
}

/// Workflow-wide defaults and limits (spec §3, `Workflow.config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "WorkflowConfig::default_workflow_timeout_ms")]
    pub workflow_timeout_ms: u64,
    #[serde(default = "WorkflowConfig::default_task_timeout_ms")]
    pub default_task_timeout_ms: u64,
    #[serde(default = "WorkflowConfig::default_concurrency_cap")]
    pub concurrency_cap: usize,
    #[serde(default)]
    pub on_error: OnError,
}

impl WorkflowConfig {
    fn default_workflow_timeout_ms() -> u64 {
        3_600_000
    }
    fn default_task_timeout_ms() -> u64 {
        30_000
    }
    fn default_concurrency_cap() -> usize {
        8
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workflow_timeout_ms: Self::default_workflow_timeout_ms(),
            default_task_timeout_ms: Self::default_task_timeout_ms(),
            concurrency_cap: Self::default_concurrency_cap(),
            on_error: OnError::default(),
        }
    }
}

/// What happens when a task fails terminally (spec §3, §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnError {
    /// Propagate: downstream tasks that depend on this one are skipped.
    Fail,
    /// Record the failure but let independent downstream tasks proceed.
    Continue,
    /// Run the listed fallback tasks; the original task stays `failed`.
    Fallback { tasks: Vec<String> },
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Fail
    }
}

/// Backoff policy applied by the retry/timeout/circuit-breaker wrapper
/// (spec §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "RetryPolicy::default_retry_on")]
    pub retry_on: BTreeSet<ErrorKind>,
}

impl RetryPolicy {
    /// The effective policy for a task that declares no `retry` at all:
    /// a single attempt, nothing retried. Spec note: "retry with
    /// `maxAttempts = 1` is equivalent to no retry" — this is that policy,
    /// used by the planner to annotate tasks rather than leaving retry
    /// `Option`-shaped all the way down to the executor (spec §4.4 step 5).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: Self::default_multiplier(),
            retry_on: BTreeSet::new(),
        }
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    fn default_retry_on() -> BTreeSet<ErrorKind> {
        [ErrorKind::Timeout, ErrorKind::TransientAgentError]
            .into_iter()
            .collect()
    }

    /// Delay before the given attempt (1-indexed), per spec §4.3 step 4:
    /// `min(maxDelay, initialDelay · multiplier^(attempt-1))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        std::time::Duration::from_millis(capped as u64)
    }
}

/// One node in a workflow's DAG (spec §3, `TaskSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub agent_type: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_error: OnError,
    /// A `${...}` expression over earlier outputs; false ⇒ the task is
    /// skipped without dispatch (spec §4.5).
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Error)]
pub enum WorkflowValidationError {
    #[error("task '{0}' depends on unknown task '{1}'")]
    UnknownDependency(String, String),
    #[error("duplicate task name '{0}'")]
    DuplicateTaskName(String),
    #[error("empty task name")]
    EmptyTaskName,
}

/// A versioned workflow template (spec §3, `Workflow`). Immutable once an
/// `Execution` references it; edits produce a new `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub version: u64,
    pub tasks: Vec<TaskSpec>,
    pub trigger: Trigger,
    #[serde(default)]
    pub config: WorkflowConfig,
}

impl Workflow {
    /// Structural validation independent of the DAG planner: unique task
    /// names and `dependsOn` references that exist. Cycle detection is the
    /// planner's job (spec §4.4), since it needs the full edge set anyway.
    pub fn validate_structure(&self) -> Result<(), WorkflowValidationError> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(WorkflowValidationError::EmptyTaskName);
            }
            if !seen.insert(task.name.as_str()) {
                return Err(WorkflowValidationError::DuplicateTaskName(
                    task.name.clone(),
                ));
            }
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(WorkflowValidationError::UnknownDependency(
                        task.name.clone(),
                        dep.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Effective timeout for a task: its own value, else the workflow
    /// default, else the global 30s fallback (spec §3, `TaskSpec.timeoutMs`).
    pub fn effective_timeout_ms(&self, task: &TaskSpec) -> u64 {
        task.timeout_ms.unwrap_or(self.config.default_task_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, depends_on: &[&str]) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            agent_type: "http".to_string(),
            action: "get".to_string(),
            parameters: Value::Null,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry: None,
            timeout_ms: None,
            on_error: OnError::default(),
            condition: None,
        }
    }

    fn workflow(tasks: Vec<TaskSpec>) -> Workflow {
        Workflow {
            id: "wf-1".to_string(),
            name: "test".to_string(),
            version: 1,
            tasks,
            trigger: Trigger::Manual,
            config: WorkflowConfig::default(),
        }
    }

    #[test]
    fn validate_structure_accepts_known_dependencies() {
        let wf = workflow(vec![task("a", &[]), task("b", &["a"])]);
        assert!(wf.validate_structure().is_ok());
    }

    #[test]
    fn validate_structure_rejects_unknown_dependency() {
        let wf = workflow(vec![task("a", &["missing"])]);
        let err = wf.validate_structure().unwrap_err();
        assert!(matches!(err, WorkflowValidationError::UnknownDependency(_, _)));
    }

    #[test]
    fn validate_structure_rejects_duplicate_names() {
        let wf = workflow(vec![task("a", &[]), task("a", &[])]);
        let err = wf.validate_structure().unwrap_err();
        assert!(matches!(err, WorkflowValidationError::DuplicateTaskName(_)));
    }

    #[test]
    fn retry_policy_backs_off_exponentially_with_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 10,
            max_delay_ms: 35,
            multiplier: 2.0,
            retry_on: RetryPolicy::default_retry_on(),
        };
        assert_eq!(policy.delay_for_attempt(1).as_millis(), 10);
        assert_eq!(policy.delay_for_attempt(2).as_millis(), 20);
        // 10 * 2^2 = 40, capped at 35.
        assert_eq!(policy.delay_for_attempt(3).as_millis(), 35);
    }

    #[test]
    fn effective_timeout_falls_back_to_workflow_default() {
        let wf = workflow(vec![task("a", &[])]);
        let t = wf.task("a").unwrap();
        assert_eq!(wf.effective_timeout_ms(t), 30_000);
    }
}
