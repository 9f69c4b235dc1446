//! Typed records held by the research state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a subtopic. Advances monotonically; the only
/// regression allowed is an explicit retry from a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtopicStatus {
    #[default]
    Pending,
    Searching,
    Scraping,
    Summarizing,
    Done,
    Failed,
}

/// A scoped sub-question produced by the planner; the unit of fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtopic {
    /// Stable identifier, e.g. `st-2`.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Pre-generated search queries, in execution order.
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub status: SubtopicStatus,
}

impl Subtopic {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            id: format!("st-{}", index + 1),
            title: title.into(),
            description: String::new(),
            search_queries: Vec::new(),
            status: SubtopicStatus::Pending,
        }
    }
}

/// A single web search result attributed to a subtopic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    /// Relevance score in [0, 1].
    pub score: f64,
    pub subtopic_id: String,
}

/// Extracted content from a scraped web page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    /// Quality score in [0, 1].
    pub quality_score: f64,
    pub word_count: usize,
    pub subtopic_id: String,
    /// Set when quality landed in the flagged band (above reject,
    /// below accept) so downstream consumers can filter.
    #[serde(default)]
    pub flagged: bool,
}

/// Dense prose summary of one subtopic's scraped content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtopicSummary {
    pub subtopic_id: String,
    pub title: String,
    pub summary: String,
    /// Cited source URLs, deduplicated, in first-seen order.
    pub citations: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    pub token_count: u32,
}

/// An error recorded during the run. Recoverable errors never abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Graph node where the error occurred.
    pub node: String,
    #[serde(default)]
    pub subtopic_id: Option<String>,
    pub message: String,
    pub recoverable: bool,
}

impl ErrorEntry {
    pub fn recoverable(node: &str, message: impl Into<String>) -> Self {
        Self {
            node: node.to_string(),
            subtopic_id: None,
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn for_subtopic(node: &str, subtopic_id: &str, message: impl Into<String>) -> Self {
        Self {
            node: node.to_string(),
            subtopic_id: Some(subtopic_id.to_string()),
            message: message.into(),
            recoverable: true,
        }
    }
}

/// Metadata describing the synthesized report.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportMetadata {
    pub title: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub source_count: usize,
    /// Subtopic ids skipped or failed before synthesis.
    #[serde(default)]
    pub coverage_gaps: Vec<String>,
    /// Source index numbers defined but never referenced in the body.
    #[serde(default)]
    pub unreferenced_sources: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtopic_ids_are_one_based() {
        let s = Subtopic::new(0, "What is a vector database?");
        assert_eq!(s.id, "st-1");
        assert_eq!(s.status, SubtopicStatus::Pending);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SubtopicStatus::Summarizing).unwrap();
        assert_eq!(json, "\"summarizing\"");
    }

    #[test]
    fn test_error_entry_subtopic_tagging() {
        let e = ErrorEntry::for_subtopic("search", "st-2", "all queries failed");
        assert_eq!(e.subtopic_id.as_deref(), Some("st-2"));
        assert!(e.recoverable);
    }
}
