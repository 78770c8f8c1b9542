use std::time::Duration;

use orc_agents::AgentRegistry;
use orc_expr::{resolve_parameters, Context as ExprContext};
use orc_model::{ErrorKind, SkipReason, TaskError, TaskSpec};
use orc_planner::PlanEntry;
use orc_policy::{dispatch_with_policy, AttemptContext, CircuitBreaker};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// What running one task to terminal produced (spec §4.5, "Transitions").
/// `attempts` is the 0-indexed retry count — dispatch attempts made beyond
/// the first — matching spec §3's `TaskState.attempt` ("starts at 0") and
/// scenario S3 (two failures then a success yields `attempt = 2`).
pub enum TaskOutcome {
    Succeeded { output: Value, attempts: u32 },
    Failed { error: TaskError, attempts: u32 },
    Skipped(SkipReason),
    Cancelled { attempts: u32 },
}

/// Runs exactly one `TaskState` to terminal: evaluates its condition,
/// resolves its parameters, dispatches through the agent registry wrapped
/// by the retry/timeout/circuit-breaker policy, and reports what happened
/// (spec §4.5, Task Executor).
#[instrument(skip_all, fields(task = %task.name, agent_type = %task.agent_type, action = %task.action))]
pub async fn execute_task(
    agents: &AgentRegistry,
    breaker: &CircuitBreaker,
    task: &TaskSpec,
    plan_entry: &PlanEntry,
    expr_ctx: &ExprContext<'_>,
    deadline: Duration,
    cancel: &CancellationToken,
) -> TaskOutcome {
    if deadline.is_zero() {
        // Spec §8 boundary behavior: a zero effective timeout fails the
        // task immediately, before parameter resolution or dispatch.
        return TaskOutcome::Failed {
            error: TaskError::new(ErrorKind::Timeout, "task timeout is zero"),
            attempts: 0,
        };
    }

    if let Some(condition) = &task.condition {
        match resolve_parameters(&Value::String(condition.clone()), expr_ctx) {
            Ok(Value::Bool(false)) => {
                return TaskOutcome::Skipped(SkipReason::ConditionFalse);
            }
            Ok(Value::Bool(true)) => {}
            Ok(_non_boolean) => {
                return TaskOutcome::Failed {
                    error: TaskError::non_retryable(
                        ErrorKind::ValidationError,
                        "condition did not resolve to a boolean",
                    ),
                    attempts: 0,
                };
            }
            Err(err) => {
                return TaskOutcome::Failed {
                    error: TaskError::non_retryable(ErrorKind::ParamResolution, err.to_string()),
                    attempts: 0,
                };
            }
        }
    }

    let resolved_params = match resolve_parameters(&task.parameters, expr_ctx) {
        Ok(params) => params,
        Err(err) => {
            return TaskOutcome::Failed {
                error: TaskError::non_retryable(ErrorKind::ParamResolution, err.to_string()),
                attempts: 0,
            };
        }
    };

    let agent = match agents.resolve_action(&task.agent_type, &task.action) {
        Ok(agent) => agent,
        Err(_) => {
            return TaskOutcome::Failed {
                error: TaskError::non_retryable(
                    ErrorKind::AgentNotFound,
                    format!("{}/{}", task.agent_type, task.action),
                ),
                attempts: 0,
            };
        }
    };

    // Held across the whole dispatch, retries included, so a concurrency
    // limit bounds how many attempts against this agent type run at once
    // rather than just how many tasks are "in flight" at the runtime level
    // (spec §5, "Ordering guarantees").
    let _permit = match agents.acquire_concurrency_permit(&task.agent_type).await {
        Ok(permit) => permit,
        Err(_) => {
            return TaskOutcome::Failed {
                error: TaskError::non_retryable(
                    ErrorKind::AgentNotFound,
                    format!("{}/{}", task.agent_type, task.action),
                ),
                attempts: 0,
            };
        }
    };

    let idempotent = agent.is_idempotent(&task.action);
    let attempt_ctx = AttemptContext {
        agent_type: &task.agent_type,
        action: &task.action,
        idempotent,
        deadline,
    };

    let action = task.action.clone();
    let (result, dispatch_count) =
        dispatch_with_policy(breaker, &plan_entry.retry, &attempt_ctx, cancel, move |_attempt| {
            let agent = agent.clone();
            let action = action.clone();
            let params = resolved_params.clone();
            async move { agent.execute(&action, params).await }
        })
        .await;
    // `dispatch_count` is 1-indexed (total dispatch calls made); `TaskState.attempt`
    // starts at 0 and counts retries, i.e. dispatches beyond the first (spec §3, S3).
    let attempts = dispatch_count.saturating_sub(1);

    match result {
        Ok(value) => TaskOutcome::Succeeded { output: value, attempts },
        Err(err) if err.kind == ErrorKind::Cancelled => TaskOutcome::Cancelled { attempts },
        Err(err) => TaskOutcome::Failed { error: err, attempts },
    }
}
