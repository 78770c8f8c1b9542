//! The `Agent` trait and the registry that resolves `(agentType, action)`
//! dispatch targets for the workflow runtime (spec §4.1).

mod error;
mod registry;

pub use error::{Error, Result};
pub use registry::AgentRegistry;

use async_trait::async_trait;
use orc_model::{ActionSpec, AgentOutcome};
use serde_json::Value;

/// A pluggable unit of work the orchestrator can dispatch tasks to.
///
/// Implementors own everything about how an action actually runs — an HTTP
/// call, a subprocess, an LLM invocation — and report back a closed
/// `AgentOutcome` rather than an arbitrary error type, so the retry/circuit
/// breaker layer never has to guess what went wrong.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The `agentType` this instance answers to, e.g. `"http"`, `"shell"`.
    fn agent_type(&self) -> &str;

    /// Actions this agent exposes, for `ListAgents()` and parameter
    /// validation (spec §6).
    fn actions(&self) -> Vec<ActionSpec>;

    /// Whether calling `action` twice with the same parameters has the same
    /// effect as calling it once. A non-idempotent action that times out is
    /// not safely retryable even if its `ErrorKind` would otherwise allow it
    /// (spec §4.3, §7 `InterruptedNonIdempotent`).
    fn is_idempotent(&self, action: &str) -> bool;

    /// Upper bound on concurrently in-flight calls to this agent type,
    /// across all executions. `None` means unbounded (spec §4.1).
    fn max_concurrent(&self) -> Option<usize> {
        None
    }

    /// Runs the action. Never panics on ordinary failure — ordinary
    /// failure is an `AgentOutcome::failure(..)`, not a panic or an `Err`.
    async fn execute(&self, action: &str, params: Value) -> AgentOutcome;

    /// Best-effort hook run once when the agent is registered. The registry
    /// bounds this with a 30s timeout and logs failure rather than
    /// rejecting registration outright.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Best-effort hook run when the registry is torn down, same timeout
    /// and failure handling as `initialize`.
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
