//! # Error Taxonomy
//!
//! Typed failure kinds for the research pipeline. Provider-level errors
//! carry a retry classification; pipeline-level errors decide whether a
//! run continues, degrades, or aborts.

use thiserror::Error;

/// Failure of a single outbound provider call (LLM, search, extractor).
///
/// The variant decides the retry policy: `Transient` and `RateLimited`
/// are retried with backoff, `Permanent` advances the fallback chain
/// immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether this failure may succeed on retry against the same provider.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited(_))
    }
}

/// Pipeline-level failures surfaced by stages and the executor.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every provider in a fallback chain failed for one logical call.
    #[error("all providers exhausted for {intent}: {detail}")]
    ModelCallExhausted { intent: String, detail: String },

    /// The planner could not produce a single parseable subtopic.
    #[error("planner produced no usable subtopics: {0}")]
    PlanInvalid(String),

    /// A scrape target failed after retries. Recorded, never fatal.
    #[error("scrape failed for {url}: {detail}")]
    ScrapeFailed { url: String, detail: String },

    /// A checkpoint failed integrity verification.
    #[error("checkpoint {checkpoint_id} is corrupt: {detail}")]
    CheckpointCorrupt {
        checkpoint_id: String,
        detail: String,
    },

    /// Checkpoint persistence failed for a non-integrity reason.
    #[error("checkpoint store failure: {0}")]
    Checkpoint(String),

    /// The cost budget is fully consumed.
    #[error("budget exceeded: spent ${spent:.4} of ${max:.2}")]
    BudgetExceeded { spent: f64, max: f64 },

    /// Cooperative shutdown was requested and honored.
    #[error("run cancelled by shutdown signal")]
    Cancelled,

    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A stage exceeded its timeout.
    #[error("stage {node} timed out after {seconds}s")]
    StageTimeout { node: String, seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_retryability() {
        assert!(ProviderError::Transient("timeout".into()).is_retryable());
        assert!(ProviderError::RateLimited("429".into()).is_retryable());
        assert!(!ProviderError::Permanent("401".into()).is_retryable());
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::BudgetExceeded {
            spent: 2.1234,
            max: 2.0,
        };
        assert!(err.to_string().contains("$2.1234"));
    }
}
