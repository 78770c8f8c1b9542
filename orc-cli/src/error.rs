use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),
    #[error("execution '{0}' not found")]
    ExecutionNotFound(String),
    #[error(transparent)]
    Validation(#[from] orc_model::WorkflowValidationError),
    #[error(transparent)]
    Plan(#[from] orc_planner::PlanError),
    #[error(transparent)]
    Store(#[from] orc_store::StoreError),
    #[error(transparent)]
    Schedule(#[from] orc_scheduler::SchedulerError),
    /// The bounded submission queue is full (spec §5, "Backpressure").
    #[error("orchestrator is overloaded")]
    Overloaded,
}

pub type Result<T> = std::result::Result<T, FacadeError>;
