//! Partial state updates and the reducer that merges them.
//!
//! Stages never mutate the state they receive; they return a
//! `StateUpdate` describing their contribution. Three merge semantics
//! exist: append (ordered lists), union (`seen_urls`), and overwrite
//! (scalars, applied only when present). Applying an empty update is a
//! no-op.

use super::models::{
    ErrorEntry, ReportMetadata, ScrapedPage, SearchResult, Subtopic, SubtopicStatus,
    SubtopicSummary,
};
use super::research::ResearchState;
use crate::degrade::DegradationTier;
use std::collections::BTreeSet;

/// A partial update produced by one stage invocation.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// Overwrite: full replacement of the subtopic list (planner, and
    /// status advances routed through here).
    pub subtopics: Option<Vec<Subtopic>>,
    /// Overwrite.
    pub current_subtopic_index: Option<usize>,
    /// Append.
    pub search_results: Vec<SearchResult>,
    /// Append.
    pub scraped_pages: Vec<ScrapedPage>,
    /// Append.
    pub subtopic_summaries: Vec<SubtopicSummary>,
    /// Union.
    pub seen_urls: BTreeSet<String>,
    /// Append.
    pub errors: Vec<ErrorEntry>,
    /// Overwrite.
    pub final_report: Option<String>,
    /// Overwrite.
    pub report_metadata: Option<ReportMetadata>,
    /// Targeted status advance for a single subtopic, keyed by id.
    pub subtopic_status: Option<(String, SubtopicStatus)>,
    /// Observation masking: clear the raw `content` of already-consumed
    /// pages belonging to this subtopic to bound state size.
    pub evict_content_for: Option<String>,
}

impl StateUpdate {
    /// True when applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.subtopics.is_none()
            && self.current_subtopic_index.is_none()
            && self.search_results.is_empty()
            && self.scraped_pages.is_empty()
            && self.subtopic_summaries.is_empty()
            && self.seen_urls.is_empty()
            && self.errors.is_empty()
            && self.final_report.is_none()
            && self.report_metadata.is_none()
            && self.subtopic_status.is_none()
            && self.evict_content_for.is_none()
    }
}

impl ResearchState {
    /// Merge a stage's partial update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(subtopics) = update.subtopics {
            self.subtopics = subtopics;
        }
        if let Some(index) = update.current_subtopic_index {
            self.current_subtopic_index = index;
        }

        self.search_results.extend(update.search_results);
        self.scraped_pages.extend(update.scraped_pages);
        self.subtopic_summaries.extend(update.subtopic_summaries);
        self.errors.extend(update.errors);
        self.seen_urls.extend(update.seen_urls);

        if let Some(report) = update.final_report {
            self.final_report = Some(report);
        }
        if let Some(metadata) = update.report_metadata {
            self.report_metadata = Some(metadata);
        }

        if let Some((id, status)) = update.subtopic_status {
            if let Some(subtopic) = self.subtopics.iter_mut().find(|s| s.id == id) {
                subtopic.status = status;
            }
        }

        if let Some(subtopic_id) = update.evict_content_for {
            for page in self
                .scraped_pages
                .iter_mut()
                .filter(|p| p.subtopic_id == subtopic_id)
            {
                page.content.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_state() -> ResearchState {
        let mut state = ResearchState::new("run-t", "query");
        state.subtopics = vec![Subtopic::new(0, "first"), Subtopic::new(1, "second")];
        state
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut state = seeded_state();
        let before = serde_json::to_value(&state).unwrap();

        assert!(StateUpdate::default().is_empty());
        state.apply(StateUpdate::default());

        assert_eq!(before, serde_json::to_value(&state).unwrap());
    }

    #[test]
    fn test_append_preserves_order() {
        let mut state = seeded_state();
        state.apply(StateUpdate {
            search_results: vec![SearchResult {
                url: "https://a.example/one".into(),
                title: "one".into(),
                snippet: String::new(),
                score: 0.9,
                subtopic_id: "st-1".into(),
            }],
            ..Default::default()
        });
        state.apply(StateUpdate {
            search_results: vec![SearchResult {
                url: "https://a.example/two".into(),
                title: "two".into(),
                snippet: String::new(),
                score: 0.8,
                subtopic_id: "st-1".into(),
            }],
            ..Default::default()
        });

        let urls: Vec<&str> = state.search_results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/one", "https://a.example/two"]);
    }

    #[test]
    fn test_seen_urls_union() {
        let mut state = seeded_state();
        let mut first = BTreeSet::new();
        first.insert("https://a.example/".to_string());
        state.apply(StateUpdate {
            seen_urls: first.clone(),
            ..Default::default()
        });
        // Re-applying the same URL plus one more yields two entries.
        first.insert("https://b.example/".to_string());
        state.apply(StateUpdate {
            seen_urls: first,
            ..Default::default()
        });
        assert_eq!(state.seen_urls.len(), 2);
    }

    #[test]
    fn test_status_advance_targets_one_subtopic() {
        let mut state = seeded_state();
        state.apply(StateUpdate {
            subtopic_status: Some(("st-2".into(), SubtopicStatus::Failed)),
            ..Default::default()
        });
        assert_eq!(state.subtopics[0].status, SubtopicStatus::Pending);
        assert_eq!(state.subtopics[1].status, SubtopicStatus::Failed);
    }

    #[test]
    fn test_observation_masking_clears_only_target_subtopic() {
        let mut state = seeded_state();
        state.scraped_pages = vec![
            ScrapedPage {
                url: "https://a.example/".into(),
                title: String::new(),
                content: "long body".into(),
                quality_score: 0.8,
                word_count: 2,
                subtopic_id: "st-1".into(),
                flagged: false,
            },
            ScrapedPage {
                url: "https://b.example/".into(),
                title: String::new(),
                content: "kept body".into(),
                quality_score: 0.8,
                word_count: 2,
                subtopic_id: "st-2".into(),
                flagged: false,
            },
        ];

        state.apply(StateUpdate {
            evict_content_for: Some("st-1".into()),
            ..Default::default()
        });

        assert!(state.scraped_pages[0].content.is_empty());
        assert_eq!(state.scraped_pages[1].content, "kept body");
        // The page record itself survives masking.
        assert_eq!(state.scraped_pages[0].url, "https://a.example/");
    }

    #[test]
    fn test_scalar_overwrite_only_when_present() {
        let mut state = seeded_state();
        state.final_report = Some("draft".into());
        state.apply(StateUpdate::default());
        assert_eq!(state.final_report.as_deref(), Some("draft"));

        state.apply(StateUpdate {
            final_report: Some("final".into()),
            ..Default::default()
        });
        assert_eq!(state.final_report.as_deref(), Some("final"));
    }
}
