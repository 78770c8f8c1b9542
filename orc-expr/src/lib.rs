//! Resolves `${scope.path}` references inside task parameters (spec §4.2).
//!
//! Deliberately not a general expression language: no arithmetic, no
//! function calls, no side effects — just scoped lookups with dot/index
//! paths and an optional `?? default`.

mod context;
mod error;
mod path;
mod resolver;

pub use context::Context;
pub use error::{ExprError, Result};
pub use path::{parse_path, walk, PathSegment};
pub use resolver::{resolve_parameters, scan_task_references};
