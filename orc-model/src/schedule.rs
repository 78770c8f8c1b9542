use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workflow's cron schedule (spec §3, `ScheduleEntry`). `lastDedupKey` is
/// the ISO timestamp of the last slot that was actually fired, kept here
/// for display; `tryRecordFire`'s dedup guarantee lives in the store, which
/// is the only thing allowed to decide "has this slot fired."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub workflow_id: String,
    pub cron_expr: String,
    pub timezone: String,
    pub enabled: bool,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_dedup_key: Option<String>,
}

impl ScheduleEntry {
    pub fn new(workflow_id: impl Into<String>, cron_expr: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            cron_expr: cron_expr.into(),
            timezone: timezone.into(),
            enabled: true,
            next_fire_at: None,
            last_dedup_key: None,
        }
    }
}

/// Single active holder of scheduler duties across a process cluster
/// (spec §3, `SchedulerLease`; §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerLease {
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SchedulerLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Per-`(agentType, action)` failure gate state (spec §3, `CircuitBreaker`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}
