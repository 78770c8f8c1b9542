use serde::{Deserialize, Serialize};

/// The closed set of error kinds every failure in the orchestrator maps to
/// (spec §7). Callers match exhaustively; there is no "Other" variant by
/// design — an error that doesn't fit one of these is a modeling bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed workflow spec or unknown reference. Non-retryable.
    ValidationError,
    /// A referenced upstream task output was missing or null. Non-retryable
    /// per attempt.
    ParamResolution,
    /// No descriptor registered for `(agentType, action)`. Non-retryable.
    AgentNotFound,
    /// The dispatch deadline elapsed. Retryable iff the agent is idempotent.
    Timeout,
    /// The agent itself signalled a transient failure. Retryable.
    TransientAgentError,
    /// The agent itself signalled a permanent failure (auth, 4xx semantics).
    /// Non-retryable.
    PermanentAgentError,
    /// The circuit breaker denied the call outright.
    CircuitOpen,
    /// A non-idempotent task was `running` when the process crashed.
    /// Non-retryable.
    InterruptedNonIdempotent,
    /// Explicit cancellation. Terminal, not a fault.
    Cancelled,
}

impl ErrorKind {
    /// Whether this kind is ever eligible for retry, independent of a
    /// specific policy's `retryOn` set.
    pub fn is_retryable_kind(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::TransientAgentError)
    }
}

/// A structured task failure: kind + message + whether this specific
/// occurrence was retryable (an agent may mark an otherwise-retryable kind
/// as non-retryable, e.g. a non-idempotent agent under `Timeout`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = kind.is_retryable_kind();
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn non_retryable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// The first failing task in an execution, carried on `Execution` for
/// at-a-glance diagnosis (spec §7, "User-visible behavior").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDigest {
    pub task_name: String,
    pub kind: ErrorKind,
    pub message: String,
}
