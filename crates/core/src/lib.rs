//! # Prospector Core
//!
//! Crash-resilient deep-research pipeline. Given a natural-language
//! query, the executor decomposes it into subtopics, fans out web
//! search and content extraction per subtopic, compresses findings,
//! and synthesizes a cited Markdown report. Every stage boundary is
//! checkpointed atomically with an integrity hash, so a crashed run
//! resumes exactly where it stopped.
//!
//! ## Architecture
//!
//! - `pipeline/` - graph executor, conditional routing, stage functions
//! - `state/` - typed research state and append/union/overwrite reducers
//! - `store/` - atomic checkpoints, run layout, progressive report
//! - `event` - append-only JSONL audit trail with provenance links
//! - `llm/`, `search/`, `scrape/` - provider adapters and their services
//! - `budget` + `degrade` - cost metering and the FULL -> REDUCED ->
//!   CACHED -> PARTIAL degradation state machine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prospector_core::config::Settings;
//! use prospector_core::pipeline::{Executor, RunContext};
//! use prospector_core::store::{generate_run_id, RunLayout};
//!
//! let settings = Settings::default();
//! let layout = RunLayout::new(&settings.checkpoints.dir, generate_run_id());
//! let ctx = RunContext::from_env(settings, layout, "my query")?;
//! let state = Executor::new(ctx).run_fresh("my query").await?;
//! ```

pub mod budget;
pub mod config;
pub mod degrade;
pub mod error;
pub mod event;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod scrape;
pub mod search;
pub mod shutdown;
pub mod state;
pub mod store;

pub use config::Settings;
pub use error::{PipelineError, ProviderError};
pub use pipeline::{Executor, RunContext};
pub use state::ResearchState;
