//! Turns a `Workflow` into a `Plan`: reference validation, cycle detection,
//! implicit dependency inference from `${tasks.X...}` scans, and
//! topological leveling via Kahn's algorithm (spec §4.4).

mod error;
mod plan;

pub use error::{PlanError, Result};
pub use plan::{build_plan, Plan, PlanEntry};
