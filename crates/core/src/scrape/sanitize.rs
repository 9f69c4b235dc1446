//! Content sanitization.
//!
//! Scraped text feeds straight into LLM prompts, so control characters,
//! chat-template boundary markers, and instruction-override phrasing
//! are scrubbed before anything reaches the summarizer.

use regex::Regex;
use std::sync::LazyLock;

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<\|im_(start|end)\|>",
        r"(?i)\[/?INST\]",
        r"(?i)<</?SYS>>",
        r"(?i)<\|(system|user|assistant)\|>",
        r"(?i)ignore\s+(previous|above|all)\s+instructions",
        r"(?i)system\s*:\s*you\s+are",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static EXCESS_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Scrub extracted text for prompt consumption.
pub fn sanitize_content(text: &str) -> String {
    // Drop control characters, keeping newlines and tabs.
    let mut cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    for pattern in INJECTION_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "[removed]").into_owned();
    }

    let collapsed = EXCESS_BLANK_LINES.replace_all(&cleaned, "\n\n");
    collapsed.trim().to_string()
}
