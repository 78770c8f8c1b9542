use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("execution store error: {0}")]
    Store(#[from] orc_store::StoreError),
    #[error("task '{0}' completed but was missing from the plan")]
    UnplannedTask(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
