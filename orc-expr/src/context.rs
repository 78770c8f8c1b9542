use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Everything a `${scope.path}` reference can resolve against (spec §4.2).
/// Built fresh per task dispatch from the execution's current state — task
/// outputs only ever include predecessors, since resolution happens after
/// dependencies complete and before this task's own dispatch.
pub struct Context<'a> {
    pub tasks: &'a HashMap<String, Value>,
    pub env: &'a HashMap<String, String>,
    pub workflow_id: &'a str,
    pub workflow_version: u64,
    pub workflow_started_at: DateTime<Utc>,
    pub input: &'a Value,
}
