//! Retry, timeout, and circuit breaker wrapper around agent dispatch (spec
//! §4.3). Wraps every call the runtime makes to an agent; breaker state is
//! shared across executions per `(agentType, action)` key by design.

mod breaker;
mod dispatch;

pub use breaker::{BreakerDecision, CircuitBreaker};
pub use dispatch::{dispatch_with_policy, AttemptContext};
