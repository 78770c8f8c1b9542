use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orc_agents::AgentRegistry;
use orc_expr::Context as ExprContext;
use orc_model::{
    CancelReason, Execution, ExecutionStatus, OnError, SkipReason, TaskState, TaskStatus, Workflow,
};
use orc_planner::Plan;
use orc_policy::CircuitBreaker;
use orc_store::ExecutionStore;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::executor::{execute_task, TaskOutcome};
use crate::{Result, RuntimeError};

/// Drives a single `Execution` from `pending` to terminal (spec §4.6, the
/// Workflow Runtime). Owns nothing about *which* executions exist — that's
/// the orchestrator facade's job — only how to run one to completion.
pub struct WorkflowRuntime {
    agents: Arc<AgentRegistry>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<dyn ExecutionStore>,
}

impl WorkflowRuntime {
    pub fn new(
        agents: Arc<AgentRegistry>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            agents,
            breaker,
            store,
        }
    }

    #[instrument(skip_all, fields(execution_id = %execution.id, workflow_id = %workflow.id))]
    pub async fn run_execution(
        &self,
        workflow: &Workflow,
        plan: &Plan,
        execution: &mut Execution,
        cancel: CancellationToken,
    ) -> Result<()> {
        let started_at = execution.started_at.unwrap_or_else(Utc::now);
        execution.started_at = Some(started_at);
        execution.status = ExecutionStatus::Running;

        for task in &workflow.tasks {
            execution
                .task_states
                .entry(task.name.clone())
                .or_insert_with(|| TaskState::pending(task.name.clone()));
        }
        self.recover_stale_running(workflow, execution).await?;
        self.store.put_execution(execution).await?;

        let workflow_deadline = Duration::from_millis(workflow.config.workflow_timeout_ms);
        let concurrency = workflow.config.concurrency_cap.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let env: HashMap<String, String> = std::env::vars().collect();

        // Tasks named by a failed task's `onError = fallback([...])`, unlocked
        // to run regardless of their own `dependsOn` once the owner fails
        // (spec §4.5). `fallback_owner` lets a succeeding fallback task mark
        // its trigger(s) as `recovered`.
        let mut triggered_fallbacks: HashSet<String> = HashSet::new();
        let mut fallback_owner: HashMap<String, Vec<String>> = HashMap::new();

        let mut join_set: JoinSet<(String, TaskOutcome)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                self.cancel_idle_pending(execution).await?;
            } else {
                let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
                if elapsed >= workflow_deadline {
                    warn!("workflow timeout reached, cancelling execution");
                    execution.cancel_reason = Some(CancelReason::WorkflowTimeout);
                    cancel.cancel();
                    self.cancel_idle_pending(execution).await?;
                }
            }

            self.propagate_skips(workflow, plan, execution, &triggered_fallbacks)
                .await?;

            if !cancel.is_cancelled() {
                self.promote_to_ready(workflow, plan, execution, &triggered_fallbacks)
                    .await?;
                let ready = self.ready_names(workflow, execution);
                for name in ready {
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    triggered_fallbacks.remove(&name);

                    let task = workflow
                        .task(&name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UnplannedTask(name.clone()))?;
                    let plan_entry = plan
                        .entry(&name)
                        .cloned()
                        .unwrap_or_else(|| orc_planner::PlanEntry {
                            name: name.clone(),
                            effective_timeout_ms: workflow.config.default_task_timeout_ms,
                            retry: orc_model::RetryPolicy::no_retry(),
                        });

                    execution
                        .task_states
                        .get_mut(&name)
                        .expect("task state seeded above")
                        .mark_running(Utc::now());
                    self.store
                        .put_task_state(&execution.id, execution.task_states.get(&name).unwrap())
                        .await?;

                    let agents = self.agents.clone();
                    let breaker = self.breaker.clone();
                    let task_cancel = cancel.clone();
                    let tasks_output: HashMap<String, Value> = execution
                        .task_states
                        .iter()
                        .filter_map(|(n, s)| s.output.clone().map(|o| (n.clone(), o)))
                        .collect();
                    let env = env.clone();
                    let input = execution.input.clone();
                    let workflow_id = workflow.id.clone();
                    let workflow_version = workflow.version;
                    let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
                    let remaining_budget = workflow_deadline.saturating_sub(elapsed);
                    let deadline =
                        Duration::from_millis(plan_entry.effective_timeout_ms).min(remaining_budget);

                    join_set.spawn(async move {
                        let expr_ctx = ExprContext {
                            tasks: &tasks_output,
                            env: &env,
                            workflow_id: &workflow_id,
                            workflow_version,
                            workflow_started_at: started_at,
                            input: &input,
                        };
                        let outcome = execute_task(
                            &agents,
                            &breaker,
                            &task,
                            &plan_entry,
                            &expr_ctx,
                            deadline,
                            &task_cancel,
                        )
                        .await;
                        let _permit = permit;
                        (name, outcome)
                    });
                }
            }

            if join_set.is_empty() {
                if self.all_terminal(execution) {
                    break;
                }
                if cancel.is_cancelled() {
                    break;
                }
                // Nothing ready, nothing in flight, not cancelled, not all
                // terminal: every remaining task is blocked on something
                // that will never resolve. Planner invariants should
                // prevent this; treat it as a stall rather than spin.
                break;
            }

            if let Some(joined) = join_set.join_next().await {
                let (name, outcome) = joined.map_err(|err| {
                    orc_store::StoreError::Internal(format!("task join failed: {err}"))
                })?;
                self.apply_outcome(
                    workflow,
                    execution,
                    &name,
                    outcome,
                    &mut triggered_fallbacks,
                    &mut fallback_owner,
                )
                .await?;
            }
        }

        self.finalize(workflow, execution).await?;
        Ok(())
    }

    async fn apply_outcome(
        &self,
        workflow: &Workflow,
        execution: &mut Execution,
        name: &str,
        outcome: TaskOutcome,
        triggered_fallbacks: &mut HashSet<String>,
        fallback_owner: &mut HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let now = Utc::now();
        let task = workflow
            .task(name)
            .ok_or_else(|| RuntimeError::UnplannedTask(name.to_string()))?;

        match outcome {
            TaskOutcome::Succeeded { output, attempts } => {
                let state = execution.task_states.get_mut(name).unwrap();
                state.mark_succeeded(output, now);
                // `attempts` is already the 0-indexed retry count (spec §3,
                // "attempt (starts at 0)"); overwrite mark_running's generic
                // bump with it unconditionally.
                state.attempt = attempts;
                if let Some(owners) = fallback_owner.get(name) {
                    for owner in owners {
                        if let Some(owner_state) = execution.task_states.get_mut(owner) {
                            owner_state.recovered = true;
                        }
                    }
                }
                info!(task = name, "task succeeded");
            }
            TaskOutcome::Cancelled { attempts } => {
                let state = execution.task_states.get_mut(name).unwrap();
                state.mark_cancelled(now);
                state.attempt = attempts;
            }
            TaskOutcome::Skipped(reason) => {
                execution
                    .task_states
                    .get_mut(name)
                    .unwrap()
                    .mark_skipped(reason, now);
            }
            TaskOutcome::Failed { error, attempts } => {
                execution.note_failure(name, &error);
                let state = execution.task_states.get_mut(name).unwrap();
                state.mark_failed(error, now);
                state.attempt = attempts;
                match &task.on_error {
                    OnError::Fallback { tasks } => {
                        for fallback_name in tasks {
                            triggered_fallbacks.insert(fallback_name.clone());
                            fallback_owner
                                .entry(fallback_name.clone())
                                .or_default()
                                .push(name.to_string());
                        }
                    }
                    OnError::Fail | OnError::Continue => {}
                }
                warn!(task = name, "task failed");
            }
        }

        self.store
            .put_task_state(&execution.id, execution.task_states.get(name).unwrap())
            .await?;
        Ok(())
    }

    /// Fixed-point pass marking every `pending` task whose predecessors can
    /// never be satisfied as `skipped(UpstreamFailed)` (spec §4.5 "fail"
    /// propagation, and the unavoidable consequence of "continue": a
    /// dependent of a failed task cannot run no matter the mode, since its
    /// predecessor never reaches `succeeded`).
    async fn propagate_skips(
        &self,
        workflow: &Workflow,
        plan: &Plan,
        execution: &mut Execution,
        triggered_fallbacks: &HashSet<String>,
    ) -> Result<()> {
        loop {
            let mut newly_skipped = Vec::new();
            for task in &workflow.tasks {
                let name = &task.name;
                if triggered_fallbacks.contains(name) {
                    continue;
                }
                if execution.task_states.get(name).map(|s| s.status) != Some(TaskStatus::Pending) {
                    continue;
                }
                let mut blocking: Option<String> = None;
                let mut unresolved = false;
                for pred in plan.predecessors_of(name) {
                    let pred_state = match execution.task_states.get(pred) {
                        Some(s) => s,
                        None => {
                            unresolved = true;
                            continue;
                        }
                    };
                    match pred_state.status {
                        TaskStatus::Succeeded => {}
                        TaskStatus::Failed if pred_state.recovered => {}
                        TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Cancelled => {
                            blocking.get_or_insert_with(|| pred.clone());
                        }
                        _ => unresolved = true,
                    }
                }
                if !unresolved {
                    if let Some(blocker) = blocking {
                        newly_skipped.push((name.clone(), blocker));
                    }
                }
            }

            if newly_skipped.is_empty() {
                return Ok(());
            }

            let now = Utc::now();
            for (name, blocker) in newly_skipped {
                let state = execution.task_states.get_mut(&name).unwrap();
                state.mark_skipped(SkipReason::UpstreamFailed { task: blocker }, now);
                self.store.put_task_state(&execution.id, state).await?;
            }
        }
    }

    /// Marks every `pending` task whose predecessors are all satisfied (or
    /// that was unlocked as a fallback target) as `ready` and persists the
    /// transition (spec §4.6, "Scheduling loop" — the `Ready` set).
    async fn promote_to_ready(
        &self,
        workflow: &Workflow,
        plan: &Plan,
        execution: &mut Execution,
        triggered_fallbacks: &HashSet<String>,
    ) -> Result<()> {
        let mut newly_ready = Vec::new();
        for task in &workflow.tasks {
            if execution.task_states.get(&task.name).map(|s| s.status) != Some(TaskStatus::Pending) {
                continue;
            }
            let satisfied = triggered_fallbacks.contains(&task.name)
                || plan.predecessors_of(&task.name).iter().all(|pred| {
                    execution
                        .task_states
                        .get(pred)
                        .map(|s| s.status == TaskStatus::Succeeded || (s.status == TaskStatus::Failed && s.recovered))
                        .unwrap_or(false)
                });
            if satisfied {
                newly_ready.push(task.name.clone());
            }
        }
        for name in newly_ready {
            let state = execution.task_states.get_mut(&name).unwrap();
            state.mark_ready();
            self.store.put_task_state(&execution.id, state).await?;
        }
        Ok(())
    }

    /// Every task currently in the `Ready` set, in declaration order — tasks
    /// already `ready` from an earlier tick that didn't get a concurrency
    /// slot are retried here too, not just newly-promoted ones.
    fn ready_names(&self, workflow: &Workflow, execution: &Execution) -> Vec<String> {
        workflow
            .tasks
            .iter()
            .filter(|task| {
                execution.task_states.get(&task.name).map(|s| s.status) == Some(TaskStatus::Ready)
            })
            .map(|task| task.name.clone())
            .collect()
    }

    fn all_terminal(&self, execution: &Execution) -> bool {
        execution.task_states.values().all(|s| s.status.is_terminal())
    }

    async fn cancel_idle_pending(&self, execution: &mut Execution) -> Result<()> {
        let now = Utc::now();
        let idle_names: Vec<String> = execution
            .task_states
            .iter()
            .filter(|(_, s)| matches!(s.status, TaskStatus::Pending | TaskStatus::Ready))
            .map(|(n, _)| n.clone())
            .collect();
        for name in idle_names {
            let state = execution.task_states.get_mut(&name).unwrap();
            state.mark_cancelled(now);
            self.store.put_task_state(&execution.id, state).await?;
        }
        Ok(())
    }

    /// Crash recovery (spec §4.6, "Persistence discipline"): a task left
    /// `running` when the process died is safe to silently re-run only if
    /// its agent action is idempotent. Non-idempotent tasks, or tasks whose
    /// agent is no longer registered to check, are marked
    /// `failed(InterruptedNonIdempotent)` instead of being retried.
    async fn recover_stale_running(&self, workflow: &Workflow, execution: &mut Execution) -> Result<()> {
        let now = Utc::now();
        let stale: Vec<String> = execution
            .task_states
            .iter()
            .filter(|(_, s)| s.status == TaskStatus::Running)
            .map(|(n, _)| n.clone())
            .collect();

        for name in stale {
            let idempotent = workflow
                .task(&name)
                .and_then(|task| {
                    self.agents
                        .resolve_action(&task.agent_type, &task.action)
                        .ok()
                        .map(|agent| agent.is_idempotent(&task.action))
                })
                .unwrap_or(false);

            if idempotent {
                execution
                    .task_states
                    .insert(name.clone(), TaskState::pending(name.clone()));
            } else {
                let error = orc_model::TaskError::non_retryable(
                    orc_model::ErrorKind::InterruptedNonIdempotent,
                    "task was running when the process stopped",
                );
                execution.note_failure(&name, &error);
                execution
                    .task_states
                    .get_mut(&name)
                    .unwrap()
                    .mark_failed(error, now);
            }
            self.store
                .put_task_state(&execution.id, execution.task_states.get(&name).unwrap())
                .await?;
        }
        Ok(())
    }

    /// Computes the execution's terminal status (spec §4.6 step 3): succeeds
    /// iff no task is `failed` with `onError=fail`. A `continue` failure
    /// never fails the execution; a `fallback` failure only does when the
    /// fallback itself didn't recover it (resolved Open Question 1 — an
    /// unrecovered fallback is "the same as if no fallback had been
    /// declared", i.e. it falls back to `Fail` semantics).
    async fn finalize(&self, workflow: &Workflow, execution: &mut Execution) -> Result<()> {
        let now = Utc::now();
        execution.ended_at = Some(now);

        let any_cancelled = execution
            .task_states
            .values()
            .any(|s| s.status == TaskStatus::Cancelled);
        let any_hard_failure = execution.task_states.values().any(|s| {
            if s.status != TaskStatus::Failed {
                return false;
            }
            match workflow.task(&s.name).map(|t| &t.on_error) {
                Some(OnError::Continue) => false,
                Some(OnError::Fallback { .. }) => !s.recovered,
                Some(OnError::Fail) | None => true,
            }
        });

        execution.status = if any_cancelled {
            execution.cancel_reason.get_or_insert(CancelReason::UserRequested);
            ExecutionStatus::Cancelled
        } else if any_hard_failure {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };

        self.store.put_execution(execution).await?;
        Ok(())
    }
}
