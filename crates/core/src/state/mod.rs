//! # Research State
//!
//! The single unit of work flowing through the pipeline: typed records,
//! the accumulated `ResearchState`, and the reducer that merges partial
//! stage outputs into it.

pub mod models;
pub mod research;
pub mod update;

pub use models::{
    ErrorEntry, ReportMetadata, ScrapedPage, SearchResult, Subtopic, SubtopicStatus,
    SubtopicSummary,
};
pub use research::{migrate_state_value, ResearchState, SCHEMA_VERSION};
pub use update::StateUpdate;
