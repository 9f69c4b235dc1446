//! # Report Assembly
//!
//! Builds the final Markdown report from the synthesis output and the
//! accumulated summaries: a global deduplicated source index, `[n]`
//! citation validation, an explicit coverage-gaps section when
//! subtopics were skipped, and file output with a metadata sidecar.

use crate::search::url::normalize_url;
use crate::state::{ReportMetadata, ResearchState, SubtopicSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static CITATION_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_FILENAME_LENGTH: usize = 80;

/// Globally numbered, deduplicated source list.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    /// Display URLs in citation order; entry 0 is source `[1]`.
    urls: Vec<String>,
    /// Normalized URL -> 1-based citation number.
    numbers: HashMap<String, usize>,
}

impl SourceIndex {
    /// Build the index from summaries in order, deduplicating by
    /// normalized URL so the same page cites one number everywhere.
    pub fn from_summaries(summaries: &[SubtopicSummary]) -> Self {
        let mut index = Self::default();
        for summary in summaries {
            for url in &summary.citations {
                let normalized = normalize_url(url);
                if !index.numbers.contains_key(&normalized) {
                    index.urls.push(url.clone());
                    index.numbers.insert(normalized, index.urls.len());
                }
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Citation number for a URL, if indexed.
    pub fn number_for(&self, url: &str) -> Option<usize> {
        self.numbers.get(&normalize_url(url)).copied()
    }

    /// Render the numbered list handed to the synthesis prompt.
    pub fn as_prompt_block(&self) -> String {
        self.urls
            .iter()
            .enumerate()
            .map(|(i, url)| format!("[{}] {}", i + 1, url))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the `## Sources` section body.
    pub fn as_markdown(&self) -> String {
        self.urls
            .iter()
            .enumerate()
            .map(|(i, url)| format!("{}. {}", i + 1, url))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of checking `[n]` references against the source index.
#[derive(Debug, Clone, Default)]
pub struct CitationAudit {
    /// Referenced numbers with no index entry. Recorded as errors.
    pub dangling: Vec<usize>,
    /// Index entries never referenced in the body. Informational.
    pub unreferenced: Vec<usize>,
}

/// Audit every `[n]` in the body against the index.
pub fn audit_citations(body: &str, index: &SourceIndex) -> CitationAudit {
    let mut referenced = vec![false; index.len()];
    let mut dangling = Vec::new();

    for capture in CITATION_REF.captures_iter(body) {
        let Ok(number) = capture[1].parse::<usize>() else {
            continue;
        };
        if number >= 1 && number <= index.len() {
            referenced[number - 1] = true;
        } else if !dangling.contains(&number) {
            dangling.push(number);
        }
    }

    let unreferenced = referenced
        .iter()
        .enumerate()
        .filter(|(_, seen)| !**seen)
        .map(|(i, _)| i + 1)
        .collect();

    CitationAudit {
        dangling,
        unreferenced,
    }
}

/// One synthesized body section for a subtopic.
#[derive(Debug, Clone)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
}

/// The synthesized pieces the LLM contributes.
#[derive(Debug, Clone)]
pub struct SynthesisDraft {
    pub title: String,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    pub conclusions: String,
}

/// Assemble the full report, its metadata, and the citation audit.
pub fn assemble(
    state: &ResearchState,
    draft: &SynthesisDraft,
    index: &SourceIndex,
) -> (String, ReportMetadata, CitationAudit) {
    let mut report = format!("# {}\n\n", draft.title);

    report.push_str("## Executive Summary\n\n");
    report.push_str(draft.executive_summary.trim());
    report.push_str("\n\n## Key Findings\n\n");

    for section in &draft.sections {
        report.push_str(&format!("### {}\n\n{}\n\n", section.heading, section.body.trim()));
    }

    report.push_str("## Conclusions\n\n");
    report.push_str(draft.conclusions.trim());
    report.push('\n');

    let coverage_gaps = state.uncovered_subtopics();
    if !coverage_gaps.is_empty() {
        report.push_str("\n## Coverage Gaps\n\n");
        report.push_str(
            "The following subtopics could not be fully researched before the run ended:\n\n",
        );
        for id in &coverage_gaps {
            let title = state
                .subtopics
                .iter()
                .find(|s| s.id == *id)
                .map(|s| s.title.as_str())
                .unwrap_or("unknown");
            report.push_str(&format!("- `{id}`: {title}\n"));
        }
    }

    report.push_str("\n## Sources\n\n");
    report.push_str(&index.as_markdown());
    report.push('\n');

    let audit = audit_citations(&report, index);
    let metadata = ReportMetadata {
        title: draft.title.clone(),
        generated_at: Some(Utc::now()),
        word_count: report.split_whitespace().count(),
        source_count: index.len(),
        coverage_gaps,
        unreferenced_sources: audit.unreferenced.clone(),
    };

    (report, metadata, audit)
}

/// Sanitize a query into a filesystem-safe filename component.
pub fn sanitize_filename(query: &str) -> String {
    let lowered = query.to_lowercase();
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(lowered.trim(), "");
    let hyphenated = WHITESPACE_RUN.replace_all(cleaned.trim(), "-");
    let mut name = hyphenated.trim_matches('-').to_string();

    if name.len() > MAX_FILENAME_LENGTH {
        let mut cut = MAX_FILENAME_LENGTH;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        name = name.trim_end_matches('-').to_string();
    }

    if name.is_empty() {
        "report".to_string()
    } else {
        name
    }
}

/// Write the report plus a `.meta.json` sidecar; returns the report path.
pub fn write_report(
    report: &str,
    query: &str,
    output_dir: &Path,
    metadata: &ReportMetadata,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create report directory: {}", output_dir.display()))?;

    let now = Utc::now();
    let filename = format!("{}_{}.md", sanitize_filename(query), now.format("%Y%m%d_%H%M%S"));
    let report_path = output_dir.join(&filename);

    std::fs::write(&report_path, report)
        .with_context(|| format!("Failed to write report: {}", report_path.display()))?;

    let sidecar = json!({
        "query": query,
        "generated_at": now.to_rfc3339(),
        "word_count": metadata.word_count,
        "source_count": metadata.source_count,
        "coverage_gaps": metadata.coverage_gaps,
        "filename": filename,
    });
    let meta_path = report_path.with_extension("meta.json");
    std::fs::write(&meta_path, serde_json::to_string_pretty(&sidecar)?)
        .with_context(|| format!("Failed to write report metadata: {}", meta_path.display()))?;

    tracing::info!(
        path = %report_path.display(),
        words = metadata.word_count,
        "report_written"
    );
    Ok(report_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Subtopic;

    fn summary(id: &str, citations: &[&str]) -> SubtopicSummary {
        SubtopicSummary {
            subtopic_id: id.to_string(),
            title: format!("Topic {id}"),
            summary: "A summary.".to_string(),
            citations: citations.iter().map(|s| s.to_string()).collect(),
            key_findings: vec![],
            token_count: 10,
        }
    }

    #[test]
    fn test_source_index_dedups_across_subtopics() {
        let summaries = vec![
            summary("st-1", &["https://example.com/x", "https://a.example/"]),
            summary("st-2", &["https://Example.com/x/", "https://b.example/"]),
        ];
        let index = SourceIndex::from_summaries(&summaries);

        assert_eq!(index.len(), 3);
        assert_eq!(index.number_for("https://example.com/x"), Some(1));
        // Same page, different surface form: one citation number.
        assert_eq!(index.number_for("https://Example.com/x/"), Some(1));
        assert_eq!(index.number_for("https://b.example/"), Some(3));
    }

    #[test]
    fn test_audit_finds_dangling_and_unreferenced() {
        let index = SourceIndex::from_summaries(&[summary(
            "st-1",
            &["https://a.example/", "https://b.example/", "https://c.example/"],
        )]);

        let audit = audit_citations("Cites [1] and [5] but never the rest.", &index);
        assert_eq!(audit.dangling, vec![5]);
        assert_eq!(audit.unreferenced, vec![2, 3]);
    }

    #[test]
    fn test_assemble_produces_required_sections() {
        let mut state = ResearchState::new("run-a", "What is a vector database?");
        state.subtopics = vec![Subtopic::new(0, "Fundamentals"), Subtopic::new(1, "Tradeoffs")];
        state.subtopic_summaries = vec![summary("st-1", &["https://a.example/"])];

        let draft = SynthesisDraft {
            title: "Vector Databases".into(),
            executive_summary: "They index embeddings [1].".into(),
            sections: vec![ReportSection {
                heading: "Fundamentals".into(),
                body: "Details [1].".into(),
            }],
            conclusions: "Useful.".into(),
        };
        let index = SourceIndex::from_summaries(&state.subtopic_summaries);
        let (report, metadata, _audit) = assemble(&state, &draft, &index);

        for heading in [
            "# Vector Databases",
            "## Executive Summary",
            "## Key Findings",
            "### Fundamentals",
            "## Conclusions",
            "## Coverage Gaps",
            "## Sources",
        ] {
            assert!(report.contains(heading), "missing {heading}");
        }
        // st-2 never produced a summary, so it is a named gap.
        assert!(report.contains("`st-2`"));
        assert_eq!(metadata.coverage_gaps, vec!["st-2".to_string()]);
        assert_eq!(metadata.source_count, 1);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("What is a Vector Database?"),
            "what-is-a-vector-database"
        );
        assert_eq!(sanitize_filename("???"), "report");

        let long = "word ".repeat(40);
        assert!(sanitize_filename(&long).len() <= MAX_FILENAME_LENGTH);
    }

    #[test]
    fn test_write_report_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = ReportMetadata {
            title: "T".into(),
            word_count: 2,
            source_count: 0,
            ..ReportMetadata::default()
        };

        let path = write_report("# T\n", "some query", dir.path(), &metadata).unwrap();
        assert!(path.exists());
        let sidecar = path.with_extension("meta.json");
        assert!(sidecar.exists());
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
        assert_eq!(parsed["query"], "some query");
    }
}
