//! # Configuration
//!
//! Layered settings for a research run: struct defaults, then a TOML
//! file, then environment/CLI overrides applied by the caller. API keys
//! are never stored in the file; adapters read them from the
//! environment at call time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// LLM routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Highest-quality general model, used at FULL tier.
    pub primary_model: String,
    /// Secondary-vendor model of comparable capability.
    pub fallback_model: String,
    /// Cheap/fast model reserved for REDUCED and CACHED tiers.
    pub budget_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-call timeout in seconds.
    pub timeout_s: u64,
    /// Retry attempts per provider before advancing the chain.
    pub retries: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            primary_model: "claude-sonnet-4-20250514".to_string(),
            fallback_model: "gpt-4o".to_string(),
            budget_model: "claude-3-5-haiku-20241022".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout_s: 120,
            retries: 3,
        }
    }
}

/// Web search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub max_results: usize,
    /// Search depth hint passed to the provider ("basic" or "advanced").
    pub depth: String,
    /// Results scoring below this are discarded.
    pub min_score: f64,
    pub max_concurrent: usize,
    /// Minimum delay between outbound search calls.
    pub inter_call_delay_ms: u64,
    pub timeout_s: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: 10,
            depth: "advanced".to_string(),
            min_score: 0.3,
            max_concurrent: 3,
            inter_call_delay_ms: 500,
            timeout_s: 15,
        }
    }
}

/// Content extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    /// Pages scoring below this are dropped.
    pub quality_reject: f64,
    /// Pages scoring below this (but above reject) are flagged.
    pub quality_accept: f64,
    /// Primary extraction below this retries with the fallback extractor.
    pub fallback_threshold: f64,
    pub timeout_s: u64,
    pub max_concurrent: usize,
    /// Maximum characters retained per page.
    pub max_content_length: usize,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            quality_reject: 0.3,
            quality_accept: 0.7,
            fallback_threshold: 0.4,
            timeout_s: 30,
            max_concurrent: 4,
            max_content_length: 500_000,
        }
    }
}

/// Budget guardrails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    /// Maximum cost in USD per research run.
    pub max_per_run: f64,
    /// Maximum LLM calls per run.
    pub max_llm_calls: u32,
    pub warn_fraction: f64,
    pub reduce_fraction: f64,
    pub cache_fraction: f64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            max_per_run: 2.00,
            max_llm_calls: 50,
            warn_fraction: 0.80,
            reduce_fraction: 0.80,
            cache_fraction: 0.95,
        }
    }
}

/// Checkpoint and crash-recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub dir: PathBuf,
    /// Maximum retained checkpoints (floor of 2 is enforced by the store).
    pub max_keep: usize,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/checkpoints"),
            max_keep: 5,
        }
    }
}

/// Final report output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub output_dir: PathBuf,
    /// Soft cap on report length in words.
    pub max_words: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./reports"),
            max_words: 10_000,
        }
    }
}

/// Per-stage timeout configuration for the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Hard timeout for a single stage invocation, in seconds.
    pub stage_timeout_s: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            stage_timeout_s: 600,
        }
    }
}

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub scrape: ScrapeSettings,
    pub costs: CostSettings,
    pub checkpoints: CheckpointSettings,
    pub report: ReportSettings,
    pub executor: ExecutorSettings,
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults for any
    /// section or key the file omits.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.costs.max_per_run <= 0.0 {
            anyhow::bail!("costs.max_per_run must be positive");
        }
        if !(0.0..=1.0).contains(&self.search.min_score) {
            anyhow::bail!("search.min_score must be within [0, 1]");
        }
        if self.scrape.quality_reject > self.scrape.quality_accept {
            anyhow::bail!("scrape.quality_reject must not exceed scrape.quality_accept");
        }
        if self.checkpoints.max_keep == 0 {
            anyhow::bail!("checkpoints.max_keep must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.search.max_results, 10);
        assert_eq!(settings.costs.max_per_run, 2.00);
        assert_eq!(settings.costs.warn_fraction, 0.80);
        assert_eq!(settings.checkpoints.max_keep, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let toml_src = r#"
            [costs]
            max_per_run = 0.50

            [search]
            min_score = 0.5
        "#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        assert_eq!(settings.costs.max_per_run, 0.50);
        assert_eq!(settings.search.min_score, 0.5);
        // Untouched sections keep their defaults
        assert_eq!(settings.scrape.timeout_s, 30);
        assert_eq!(settings.llm.temperature, 0.1);
    }

    #[test]
    fn test_validate_rejects_inverted_quality_band() {
        let mut settings = Settings::default();
        settings.scrape.quality_reject = 0.9;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prospector.toml");
        std::fs::write(&path, "[report]\nmax_words = 5000\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.report.max_words, 5000);
    }
}
