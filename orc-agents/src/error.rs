use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("agent type '{0}' is already registered")]
    DuplicateAgentType(String),
    #[error("no agent registered for type '{0}'")]
    AgentNotFound(String),
    #[error("agent '{0}' has no action '{1}'")]
    ActionNotFound(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;
