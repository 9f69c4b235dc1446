//! Per-run directory layout.
//!
//! ```text
//! {checkpoints.dir}/{run_id}/
//!     events.jsonl
//!     checkpoint_NNNN.json
//!     checkpoint_NNNN.sha256
//!     progress.md
//!     quarantine/
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Generate a short, filesystem-safe unique run identifier.
pub fn generate_run_id() -> String {
    let a = rand::random::<u32>();
    let b = rand::random::<u16>();
    format!("run-{a:08x}{b:04x}")
}

/// Resolved paths for one run's on-disk artifacts.
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_id: String,
    root: PathBuf,
}

impl RunLayout {
    pub fn new(base_dir: &Path, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            root: base_dir.join(&run_id),
            run_id,
        }
    }

    /// Create the run directory tree.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create run directory: {}", self.root.display()))?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.root.join("progress.md")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_layout_paths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path(), "run-test");
        assert!(!layout.exists());
        layout.ensure().unwrap();
        assert!(layout.exists());
        assert!(layout.events_path().ends_with("run-test/events.jsonl"));
        assert!(layout.progress_path().ends_with("run-test/progress.md"));
    }
}
