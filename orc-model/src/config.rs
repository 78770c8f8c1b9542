use serde::{Deserialize, Serialize};

/// The orchestrator's structured configuration object (spec §6, "CLI /
/// environment"). Defaults match the spec's documented table exactly:
/// 8 / 30_000 / 3_600_000 / 1_000 / 5 / 60_000.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub concurrency_cap: usize,
    pub default_task_timeout_ms: u64,
    pub workflow_timeout_ms: u64,
    pub scheduler_tick_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: 8,
            default_task_timeout_ms: 30_000,
            workflow_timeout_ms: 3_600_000,
            scheduler_tick_ms: 1_000,
            breaker_failure_threshold: 5,
            breaker_open_ms: 60_000,
        }
    }
}
