//! The top-level `ResearchState` and its schema migrations.

use super::models::{
    ErrorEntry, ReportMetadata, ScrapedPage, SearchResult, Subtopic, SubtopicSummary,
};
use crate::degrade::DegradationTier;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Current checkpoint schema version. Loaders migrate anything older
/// forward; migrations are additive only.
pub const SCHEMA_VERSION: u32 = 3;

/// The single unit of work for one research run.
///
/// The executor is the sole mutator: stages return a [`super::StateUpdate`]
/// which is merged in via [`ResearchState::apply`]. Sets serialize as
/// sorted arrays and field order is fixed by declaration order, so the
/// checkpoint bytes for a given state are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    #[serde(rename = "_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    pub query: String,
    pub subtopics: Vec<Subtopic>,
    pub current_subtopic_index: usize,
    pub search_results: Vec<SearchResult>,
    pub scraped_pages: Vec<ScrapedPage>,
    pub subtopic_summaries: Vec<SubtopicSummary>,
    /// Every normalized URL that ever appeared in a search result.
    pub seen_urls: BTreeSet<String>,
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub report_metadata: Option<ReportMetadata>,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub degradation_tier: DegradationTier,
    /// Name of the stage that produced the most recent checkpoint.
    /// Resume re-runs the routing function over this to pick up where
    /// the run left off.
    pub last_node: String,
}

impl ResearchState {
    pub fn new(run_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.into(),
            query: query.into(),
            subtopics: Vec::new(),
            current_subtopic_index: 0,
            search_results: Vec::new(),
            scraped_pages: Vec::new(),
            subtopic_summaries: Vec::new(),
            seen_urls: BTreeSet::new(),
            errors: Vec::new(),
            final_report: None,
            report_metadata: None,
            total_cost: 0.0,
            total_tokens: 0,
            degradation_tier: DegradationTier::Full,
            last_node: String::new(),
        }
    }

    /// The subtopic currently being worked, if the index is in range.
    pub fn current_subtopic(&self) -> Option<&Subtopic> {
        self.subtopics.get(self.current_subtopic_index)
    }

    /// Whether every subtopic has been worked through.
    pub fn subtopics_exhausted(&self) -> bool {
        self.current_subtopic_index >= self.subtopics.len()
    }

    /// Subtopic ids that never produced a summary (skipped or failed).
    pub fn uncovered_subtopics(&self) -> Vec<String> {
        self.subtopics
            .iter()
            .filter(|s| {
                !self
                    .subtopic_summaries
                    .iter()
                    .any(|summary| summary.subtopic_id == s.id)
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// Debug-time invariant checks; exercised by the test suite.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.current_subtopic_index > self.subtopics.len() {
            return Err(format!(
                "current_subtopic_index {} out of range (subtopics: {})",
                self.current_subtopic_index,
                self.subtopics.len()
            ));
        }
        if self.subtopic_summaries.len() > self.subtopics.len() {
            return Err("more summaries than subtopics".to_string());
        }
        for result in &self.search_results {
            let normalized = crate::search::url::normalize_url(&result.url);
            if !self.seen_urls.contains(&normalized) {
                return Err(format!("search result URL not in seen_urls: {}", result.url));
            }
        }
        Ok(())
    }
}

/// Migrate a raw checkpoint value to [`SCHEMA_VERSION`].
///
/// Additive-only: each step inserts missing fields with defaults and
/// bumps `_schema_version` by one. Versions newer than this binary
/// supports are rejected rather than guessed at.
pub fn migrate_state_value(mut value: Value) -> Result<Value, PipelineError> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| PipelineError::Checkpoint("checkpoint root is not an object".into()))?;

    let mut version = obj
        .get("_schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    if version > SCHEMA_VERSION {
        return Err(PipelineError::Checkpoint(format!(
            "checkpoint schema v{} is newer than supported v{}",
            version, SCHEMA_VERSION
        )));
    }

    while version < SCHEMA_VERSION {
        match version {
            1 => {
                // v2 introduced run-wide URL deduplication.
                obj.entry("seen_urls").or_insert_with(|| Value::Array(vec![]));
            }
            2 => {
                // v3 introduced error tracking and report metadata.
                obj.entry("errors").or_insert_with(|| Value::Array(vec![]));
                obj.entry("report_metadata").or_insert(Value::Null);
            }
            _ => unreachable!("no migration defined for v{version}"),
        }
        version += 1;
        obj.insert("_schema_version".to_string(), Value::from(version));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_state_satisfies_invariants() {
        let state = ResearchState::new("run-abc", "What is a vector database?");
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert!(state.check_invariants().is_ok());
        assert!(state.subtopics_exhausted());
    }

    #[test]
    fn test_migration_inserts_missing_fields() {
        let v1 = json!({
            "_schema_version": 1,
            "run_id": "run-old",
            "query": "legacy",
            "subtopics": [],
            "current_subtopic_index": 0,
            "search_results": [],
            "scraped_pages": [],
            "subtopic_summaries": [],
            "total_cost": 0.0,
            "total_tokens": 0,
            "degradation_tier": "FULL",
            "last_node": "plan"
        });

        let migrated = migrate_state_value(v1).unwrap();
        assert_eq!(migrated["_schema_version"], SCHEMA_VERSION);
        assert!(migrated["seen_urls"].as_array().unwrap().is_empty());
        assert!(migrated["errors"].as_array().unwrap().is_empty());

        // Migrated value must deserialize into the typed state.
        let state: ResearchState = serde_json::from_value(migrated).unwrap();
        assert_eq!(state.run_id, "run-old");
        assert!(state.seen_urls.is_empty());
    }

    #[test]
    fn test_migration_is_idempotent_at_current_version() {
        let state = ResearchState::new("run-x", "q");
        let value = serde_json::to_value(&state).unwrap();
        let migrated = migrate_state_value(value.clone()).unwrap();
        assert_eq!(value, migrated);
    }

    #[test]
    fn test_migration_rejects_future_versions() {
        let future = json!({ "_schema_version": SCHEMA_VERSION + 1 });
        assert!(migrate_state_value(future).is_err());
    }

    #[test]
    fn test_seen_urls_serialize_sorted() {
        let mut state = ResearchState::new("run-x", "q");
        state.seen_urls.insert("https://z.example/".to_string());
        state.seen_urls.insert("https://a.example/".to_string());

        let value = serde_json::to_value(&state).unwrap();
        let urls: Vec<&str> = value["seen_urls"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(urls, vec!["https://a.example/", "https://z.example/"]);
    }
}
