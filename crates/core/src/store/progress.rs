//! Progressive markdown report.
//!
//! Completed subtopic summaries are appended as they land, so the file
//! is a readable partial report at any moment. This is the guaranteed
//! minimum deliverable if the run dies before synthesis. Sections are
//! only ever appended, never rewritten.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ProgressWriter {
    path: PathBuf,
}

impl ProgressWriter {
    /// Open the progress file, writing a header if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>, title: &str) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !path.exists() && !title.is_empty() {
            let header = format!(
                "# {title}\n\n*Research in progress. Started {}.*\n\n",
                Utc::now().format("%Y-%m-%d %H:%M UTC")
            );
            std::fs::write(&path, header)
                .with_context(|| format!("Failed to write progress header: {}", path.display()))?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open progress file: {}", self.path.display()))?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Append a completed subtopic section with findings and sources.
    pub fn append_subtopic(
        &self,
        title: &str,
        summary: &str,
        key_findings: &[String],
        citations: &[String],
    ) -> Result<()> {
        let mut section = format!("\n## {title}\n\n{summary}\n");

        if !key_findings.is_empty() {
            section.push_str("\n**Key Findings:**\n");
            for finding in key_findings {
                section.push_str(&format!("- {finding}\n"));
            }
        }

        if !citations.is_empty() {
            section.push_str("\n**Sources:**\n");
            for citation in citations {
                section.push_str(&format!("- {citation}\n"));
            }
        }

        section.push_str("\n---\n");
        self.append(&section)?;

        tracing::info!(title = %title, "progress_subtopic_appended");
        Ok(())
    }

    /// Append an error note so the partial file explains its own gaps.
    pub fn append_error_note(&self, node: &str, message: &str) -> Result<()> {
        self.append(&format!("\n> **Note:** Error in *{node}* step: {message}\n\n"))
    }

    /// Append a status line (run resumed, tier change, shutdown).
    pub fn append_status(&self, message: &str) -> Result<()> {
        self.append(&format!("\n*{message}*\n"))
    }

    pub fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        Ok(std::fs::read_to_string(&self.path)?)
    }

    /// Number of subtopic sections written so far.
    pub fn subtopic_count(&self) -> Result<usize> {
        let content = self.read()?;
        Ok(content.lines().filter(|l| l.starts_with("## ")).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.md");

        let writer = ProgressWriter::open(&path, "Vector Databases").unwrap();
        let first = writer.read().unwrap();
        assert!(first.starts_with("# Vector Databases"));

        // Re-opening must not rewrite the header.
        let writer = ProgressWriter::open(&path, "Different Title").unwrap();
        assert_eq!(writer.read().unwrap(), first);
    }

    #[test]
    fn test_sections_accumulate_without_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ProgressWriter::open(dir.path().join("progress.md"), "T").unwrap();

        writer
            .append_subtopic(
                "First subtopic",
                "Summary one.",
                &["finding".to_string()],
                &["https://a.example/".to_string()],
            )
            .unwrap();
        let after_first = writer.read().unwrap();

        writer
            .append_subtopic("Second subtopic", "Summary two.", &[], &[])
            .unwrap();
        let after_second = writer.read().unwrap();

        // Earlier content is untouched by later appends.
        assert!(after_second.starts_with(&after_first));
        assert_eq!(writer.subtopic_count().unwrap(), 2);
        assert!(after_second.contains("**Key Findings:**"));
        assert!(after_second.contains("https://a.example/"));
    }

    #[test]
    fn test_error_note_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ProgressWriter::open(dir.path().join("progress.md"), "T").unwrap();
        writer.append_error_note("search", "all providers failed").unwrap();
        writer.append_status("Run resumed from checkpoint 3").unwrap();

        let content = writer.read().unwrap();
        assert!(content.contains("Error in *search* step"));
        assert!(content.contains("*Run resumed from checkpoint 3*"));
    }
}
