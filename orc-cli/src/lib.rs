//! Control API surface (spec §6, C9): a facade over the core components,
//! not a transport. `Orchestrator` is what an HTTP/gRPC layer would call
//! into; this crate implements no server itself.

mod error;
mod facade;

pub use error::{FacadeError, Result};
pub use facade::Orchestrator;
