//! # Stage Functions
//!
//! One module per graph node. Every stage is `async fn(&RunContext,
//! &ResearchState, parent_id) -> Result<StateUpdate>`: it may perform
//! I/O through the context's services but never mutates the state it
//! was handed — the executor applies the returned update through the
//! reducers.

pub mod plan;
pub mod scrape;
pub mod search;
pub mod summarize;
pub mod synthesize;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// JSON Schema for a structured-output type, ready for prompt embedding.
pub(crate) fn output_schema<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).expect("schema serializes")
}

/// Parse a structured LLM response, tolerating code fences and prose
/// around the JSON object.
pub(crate) fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();

    let candidate = if let Some(start) = trimmed.find('{') {
        let end = trimmed.rfind('}').context("no closing brace in response")?;
        &trimmed[start..=end]
    } else {
        trimmed
    };

    serde_json::from_str(candidate).context("response JSON did not match the expected shape")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_parse_plain_json() {
        let parsed: Sample = parse_llm_json(r#"{"value": 3}"#).unwrap();
        assert_eq!(parsed, Sample { value: 3 });
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"value\": 7}\n```\nLet me know!";
        let parsed: Sample = parse_llm_json(text).unwrap();
        assert_eq!(parsed.value, 7);
    }

    #[test]
    fn test_parse_failure_is_error() {
        assert!(parse_llm_json::<Sample>("no json here").is_err());
        assert!(parse_llm_json::<Sample>(r#"{"wrong": true}"#).is_err());
    }
}
