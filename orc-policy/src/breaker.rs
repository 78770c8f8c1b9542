use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use orc_model::CircuitState;

/// Per-`(agentType, action)` breaker entry (spec §3 `CircuitBreaker`, §4.3).
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    /// Guards the "exactly one probe allowed" rule while `HalfOpen` (spec
    /// §4.3 step 5).
    probe_in_flight: bool,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Allow,
    Deny,
}

/// Failure gate shared across executions for the same `(agentType, action)`
/// — failures in one execution protect others against the same dependency
/// (spec §4.6, "Concurrency model").
pub struct CircuitBreaker {
    table: DashMap<(String, String), BreakerEntry>,
    failure_threshold: u32,
    open_duration: ChronoDuration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: StdDuration) -> Self {
        Self {
            table: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            open_duration: ChronoDuration::from_std(open_duration)
                .unwrap_or_else(|_| ChronoDuration::milliseconds(60_000)),
        }
    }

    /// Consults the breaker before a dispatch attempt (spec §4.3 step 1).
    /// `Open` transitions to `HalfOpen` once `openTimeoutMs` has elapsed,
    /// admitting exactly one probe.
    pub fn allow(&self, agent_type: &str, action: &str) -> BreakerDecision {
        let key = (agent_type.to_string(), action.to_string());
        let mut entry = self.table.entry(key).or_default();
        match entry.state {
            CircuitState::Closed => BreakerDecision::Allow,
            CircuitState::Open => {
                let elapsed_enough = entry
                    .opened_at
                    .map(|opened_at| Utc::now() - opened_at >= self.open_duration)
                    .unwrap_or(false);
                if elapsed_enough {
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    BreakerDecision::Allow
                } else {
                    BreakerDecision::Deny
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    BreakerDecision::Deny
                } else {
                    entry.probe_in_flight = true;
                    BreakerDecision::Allow
                }
            }
        }
    }

    /// Closes the breaker on success, including the `HalfOpen` probe
    /// succeeding (spec §4.3 step 3).
    pub fn record_success(&self, agent_type: &str, action: &str) {
        let key = (agent_type.to_string(), action.to_string());
        if let Some(mut entry) = self.table.get_mut(&key) {
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.opened_at = None;
            entry.probe_in_flight = false;
        }
    }

    /// Records a failed attempt. A failed `HalfOpen` probe reopens the
    /// breaker immediately; otherwise the breaker opens once
    /// `failure_count` reaches the threshold (spec §4.3 step 4).
    pub fn record_failure(&self, agent_type: &str, action: &str) {
        let key = (agent_type.to_string(), action.to_string());
        let mut entry = self.table.entry(key).or_default();
        entry.probe_in_flight = false;
        if entry.state == CircuitState::HalfOpen {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(Utc::now());
            return;
        }
        entry.failure_count += 1;
        if entry.failure_count >= self.failure_threshold {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(Utc::now());
        }
    }

    pub fn state_of(&self, agent_type: &str, action: &str) -> CircuitState {
        let key = (agent_type.to_string(), action.to_string());
        self.table
            .get(&key)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(3, StdDuration::from_millis(60_000));
        for _ in 0..2 {
            breaker.record_failure("http", "get");
            assert_eq!(breaker.allow("http", "get"), BreakerDecision::Allow);
        }
        breaker.record_failure("http", "get");
        assert_eq!(breaker.allow("http", "get"), BreakerDecision::Deny);
        assert_eq!(breaker.state_of("http", "get"), CircuitState::Open);
    }

    #[test]
    fn half_open_allows_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, StdDuration::from_millis(0));
        breaker.record_failure("http", "get");
        assert_eq!(breaker.state_of("http", "get"), CircuitState::Open);
        // open_duration is 0, so the very next `allow` transitions to half-open.
        assert_eq!(breaker.allow("http", "get"), BreakerDecision::Allow);
        assert_eq!(breaker.state_of("http", "get"), CircuitState::HalfOpen);
        assert_eq!(breaker.allow("http", "get"), BreakerDecision::Deny);
    }

    #[test]
    fn successful_probe_closes_breaker() {
        let breaker = CircuitBreaker::new(1, StdDuration::from_millis(0));
        breaker.record_failure("http", "get");
        assert_eq!(breaker.allow("http", "get"), BreakerDecision::Allow);
        breaker.record_success("http", "get");
        assert_eq!(breaker.state_of("http", "get"), CircuitState::Closed);
        assert_eq!(breaker.allow("http", "get"), BreakerDecision::Allow);
    }

    #[test]
    fn failed_probe_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, StdDuration::from_millis(0));
        breaker.record_failure("http", "get");
        breaker.allow("http", "get");
        breaker.record_failure("http", "get");
        assert_eq!(breaker.state_of("http", "get"), CircuitState::Open);
    }

    #[test]
    fn keys_are_independent_per_agent_action_pair() {
        let breaker = CircuitBreaker::new(1, StdDuration::from_millis(60_000));
        breaker.record_failure("http", "get");
        assert_eq!(breaker.state_of("http", "get"), CircuitState::Open);
        assert_eq!(breaker.state_of("http", "post"), CircuitState::Closed);
        assert_eq!(breaker.state_of("shell", "get"), CircuitState::Closed);
    }
}
