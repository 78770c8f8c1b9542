use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
    #[error("execution store error: {0}")]
    Store(#[from] orc_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
