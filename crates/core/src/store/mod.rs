//! # Persistence
//!
//! Three-layer persistence for a run: the append-only event log lives
//! in [`crate::event`]; this module owns the atomic checkpoint store
//! and the progressive markdown report.

pub mod checkpoints;
pub mod layout;
pub mod progress;

pub use checkpoints::CheckpointStore;
pub use layout::{generate_run_id, RunLayout};
pub use progress::ProgressWriter;
