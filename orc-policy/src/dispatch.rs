use std::future::Future;
use std::time::Duration;

use orc_model::{AgentOutcome, ErrorKind, RetryPolicy, TaskError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::{BreakerDecision, CircuitBreaker};

/// Identifies the breaker key and per-attempt constraints for one dispatch
/// (spec §4.3).
pub struct AttemptContext<'a> {
    pub agent_type: &'a str,
    pub action: &'a str,
    /// Whether the agent says repeating this action has no additional
    /// effect — gates whether a `Timeout`/`TransientAgentError` is ever
    /// retried (spec §4.3 step 4, §7 `InterruptedNonIdempotent`).
    pub idempotent: bool,
    /// `min(taskTimeout, workflowRemainingBudget)` (spec §4.3 step 2).
    pub deadline: Duration,
}

/// Runs `call` under the full retry/timeout/circuit-breaker wrapper (spec
/// §4.3). `call(attempt)` is invoked once per attempt, 1-indexed, and must
/// return an `AgentOutcome` — ordinary agent failure, not a Rust `Err`.
pub async fn dispatch_with_policy<F, Fut>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    ctx: &AttemptContext<'_>,
    cancel: &CancellationToken,
    mut call: F,
) -> (Result<Value, TaskError>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AgentOutcome>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        if breaker.allow(ctx.agent_type, ctx.action) == BreakerDecision::Deny {
            return (
                Err(TaskError::non_retryable(
                    ErrorKind::CircuitOpen,
                    format!("circuit open for {}/{}", ctx.agent_type, ctx.action),
                )),
                attempt,
            );
        }

        let attempt_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return (
                    Err(TaskError::non_retryable(ErrorKind::Cancelled, "execution cancelled")),
                    attempt,
                );
            }
            res = tokio::time::timeout(ctx.deadline, call(attempt)) => res,
        };

        match attempt_result {
            Err(_elapsed) => {
                breaker.record_failure(ctx.agent_type, ctx.action);
                warn!(agent_type = ctx.agent_type, action = ctx.action, attempt, "dispatch timed out");
                if ctx.idempotent
                    && attempt < policy.max_attempts
                    && policy.retry_on.contains(&ErrorKind::Timeout)
                {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    continue;
                }
                return (
                    Err(TaskError::new(ErrorKind::Timeout, "dispatch deadline exceeded")),
                    attempt,
                );
            }
            Ok(outcome) if outcome.ok => {
                breaker.record_success(ctx.agent_type, ctx.action);
                debug!(agent_type = ctx.agent_type, action = ctx.action, attempt, "dispatch succeeded");
                return (Ok(outcome.data.unwrap_or(Value::Null)), attempt);
            }
            Ok(outcome) => {
                let kind = outcome.error_kind.unwrap_or(ErrorKind::TransientAgentError);
                breaker.record_failure(ctx.agent_type, ctx.action);
                let message = outcome.message.unwrap_or_else(|| "agent reported failure".to_string());

                let can_retry = outcome.retryable
                    && ctx.idempotent
                    && attempt < policy.max_attempts
                    && policy.retry_on.contains(&kind);

                if can_retry {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                    continue;
                }
                return (Err(TaskError::new(kind, message)), attempt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            retry_on: [ErrorKind::Timeout, ErrorKind::TransientAgentError]
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            agent_type: "http",
            action: "get",
            idempotent: true,
            deadline: Duration::from_millis(50),
        };
        let (result, attempts) = dispatch_with_policy(&breaker, &policy(), &ctx, &cancel, |_attempt| async {
            AgentOutcome::success(serde_json::json!({"ok": true}))
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            agent_type: "http",
            action: "get",
            idempotent: true,
            deadline: Duration::from_millis(50),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let (result, attempts) = dispatch_with_policy(&breaker, &policy(), &ctx, &cancel, move |_attempt| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    AgentOutcome::failure(ErrorKind::TransientAgentError, "flaky", true)
                } else {
                    AgentOutcome::success(Value::Null)
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // One failed attempt then a successful retry: attempt 2 (spec S3).
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn non_idempotent_action_never_retries_timeout() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            agent_type: "http",
            action: "post",
            idempotent: false,
            deadline: Duration::from_millis(5),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let (result, _attempts) = dispatch_with_policy(&breaker, &policy(), &ctx, &cancel, move |_attempt| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                AgentOutcome::success(Value::Null)
            }
        })
        .await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            agent_type: "http",
            action: "get",
            idempotent: true,
            deadline: Duration::from_millis(50),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let (result, _attempts) = dispatch_with_policy(&breaker, &policy(), &ctx, &cancel, move |_attempt| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { AgentOutcome::failure(ErrorKind::PermanentAgentError, "bad request", false) }
        })
        .await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::PermanentAgentError));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_denies_without_calling_agent() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("http", "get");
        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            agent_type: "http",
            action: "get",
            idempotent: true,
            deadline: Duration::from_millis(50),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let (result, _attempts) = dispatch_with_policy(&breaker, &policy(), &ctx, &cancel, move |_attempt| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { AgentOutcome::success(Value::Null) }
        })
        .await;
        assert!(matches!(result, Err(e) if e.kind == ErrorKind::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
