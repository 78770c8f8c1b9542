use thiserror::Error;

/// Failures raised while turning a `Workflow` into a `Plan` (spec §4.4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("task '{0}' depends on unknown task '{1}'")]
    UnknownDependency(String, String),
    #[error("cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("duplicate task name '{0}'")]
    DuplicateTaskName(String),
    #[error("empty task name")]
    EmptyTaskName,
}

pub type Result<T> = std::result::Result<T, PlanError>;
