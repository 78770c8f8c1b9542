use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One action an agent exposes, with its parameter/return shape (spec
/// §4.1). Schemas are plain JSON Schema trees; validation lives in
/// `orc-agents`, not here — this is the descriptive record returned by
/// `ListAgents()` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameter_schema: Value,
    #[serde(default)]
    pub return_schema: Value,
}

/// Descriptive snapshot of a registered agent, suitable for the `ListAgents`
/// control-surface operation (spec §6). The live, callable side of an agent
/// (the `Agent` trait) lives in `orc-agents`; this is its data-only shadow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptorInfo {
    pub agent_type: String,
    pub name: String,
    pub actions: Vec<ActionSpec>,
    pub max_concurrent: Option<usize>,
}
