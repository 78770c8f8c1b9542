use thiserror::Error;

/// Failures raised while resolving `${scope.path}` references (spec §4.2
/// step 2, `ResolveError`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("unknown scope '{0}' in expression")]
    UnknownScope(String),
    #[error("malformed reference path '{0}'")]
    MalformedPath(String),
    #[error("missing reference '{0}'")]
    MissingRef(String),
}

pub type Result<T> = std::result::Result<T, ExprError>;
