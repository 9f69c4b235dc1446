//! # Pipeline
//!
//! The research graph: node/routing definitions, the per-run context,
//! the five stage functions, and the executor that drives them with
//! checkpointing and resume.

pub mod context;
pub mod executor;
pub mod graph;
pub mod stages;

pub use context::RunContext;
pub use executor::Executor;
pub use graph::{route, Node};
