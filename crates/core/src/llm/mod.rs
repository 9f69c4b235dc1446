//! # Model Routing
//!
//! The provider-facing boundary: the [`CompletionBackend`] adapter
//! trait, reqwest-based Anthropic/OpenAI adapters, and the
//! [`ModelRouter`] that drives fallback chains with retry, backoff,
//! and usage accounting.

pub mod backend;
pub mod providers;
pub mod router;

pub use backend::{
    ChatMessage, CompletionBackend, CompletionRequest, CompletionResponse, Intent, PromptSpec, Role,
};
pub use providers::{AnthropicBackend, OpenAiBackend};
pub use router::{ModelCall, ModelRouter, RouterEntry};

/// Rough token estimate used for summary bookkeeping (~4 chars/token).
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Serialize a JSON value with recursively sorted keys and no
/// incidental whitespace. Schemas embedded in prompts go through this
/// so identical inputs always produce byte-identical prompt prefixes.
pub fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string serializes"));
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let a = json!({"b": {"z": 1, "a": 2}, "a": [true, null]});
        let b = json!({"a": [true, null], "b": {"a": 2, "z": 1}});
        let rendered = canonical_json(&a);
        assert_eq!(rendered, canonical_json(&b));
        assert_eq!(rendered, r#"{"a":[true,null],"b":{"a":2,"z":1}}"#);
    }
}
