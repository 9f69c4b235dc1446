//! Content quality scoring.
//!
//! A page is scored across five textual dimensions (word count, link
//! density, boilerplate, content density, sentence length), then the
//! composite is adjusted for freshness and knocked down hard when the
//! document looks paywalled. Scores live in [0, 1].

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Dimension weights; sum to 1.0.
const WEIGHT_WORD_COUNT: f64 = 0.25;
const WEIGHT_LINK_DENSITY: f64 = 0.20;
const WEIGHT_BOILERPLATE: f64 = 0.20;
const WEIGHT_CONTENT_DENSITY: f64 = 0.15;
const WEIGHT_SENTENCE_LENGTH: f64 = 0.20;

const MIN_WORDS: usize = 50;
const IDEAL_WORDS: usize = 1500;
const MAX_LINK_DENSITY: f64 = 0.4;
const IDEAL_SENTENCE_LENGTH: f64 = 20.0;

/// Multiplier applied when the document looks paywalled.
const PAYWALL_PENALTY: f64 = 0.25;

static BOILERPLATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)cookie\s+policy",
        r"(?i)privacy\s+policy",
        r"(?i)terms\s+(of\s+)?(service|use)",
        r"(?i)all\s+rights\s+reserved",
        r"(?i)subscribe\s+to\s+(our\s+)?newsletter",
        r"(?i)sign\s+up\s+for",
        r"(?i)follow\s+us\s+on",
        r"(?i)share\s+(this|on)",
        r"(?i)copyright\s+\d{4}",
        r"(?i)powered\s+by",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

// Weighted paywall signals; weight 3.0 alone crosses the threshold.
static PAYWALL_PATTERNS: LazyLock<Vec<(Regex, f64)>> = LazyLock::new(|| {
    [
        (r"(?i)subscribe\s+to\s+(read|continue|access|unlock)", 3.0),
        (
            r"(?i)(article|content|story)\s+is\s+(for\s+)?(subscribers?|members?)\s+only",
            3.0,
        ),
        (r"(?i)premium\s+(content|article|access)", 2.5),
        (r#"(?i)class\s*=\s*["'][^"']*paywall[^"']*["']"#, 2.5),
        (r"(?i)(log\s*in|sign\s*in)\s+to\s+(read|continue|access|view)", 2.0),
        (
            r"(?i)\d+\s+(free\s+)?(articles?|stories?)\s+remaining",
            2.0,
        ),
        (r"(?i)reached\s+(your|the)\s+(monthly\s+)?(article|reading)\s+limit", 2.5),
        (r"(?i)unlock\s+(this\s+)?(article|story|content)", 2.0),
        (r"(?i)(continue|keep)\s+reading\s+(with|for|by)\s+(a\s+)?subscription", 2.5),
    ]
    .iter()
    .map(|(p, w)| (Regex::new(p).unwrap(), *w))
    .collect()
});

static SENTENCE_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());

const PAYWALL_THRESHOLD: f64 = 3.0;

/// Per-dimension metrics behind a composite score.
#[derive(Debug, Clone)]
pub struct QualityMetrics {
    pub word_count: usize,
    pub link_density: f64,
    pub boilerplate_ratio: f64,
    pub content_density: f64,
    pub avg_sentence_length: f64,
    pub freshness: f64,
    pub paywalled: bool,
    pub overall: f64,
}

/// Freshness on [0, 1]: 1.0 inside a month, decaying to 0.2 at three
/// years. Unknown dates are neutral.
pub fn freshness_score(publish_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(published) = publish_date else {
        return 0.5;
    };
    let age_days = (now - published).num_days().max(0) as f64;
    if age_days <= 30.0 {
        1.0
    } else {
        let decay = (age_days - 30.0) / (365.0 * 3.0 - 30.0);
        (1.0 - 0.8 * decay.min(1.0)).max(0.2)
    }
}

/// Weighted paywall detection over the raw document.
pub fn detect_paywall(html: &str) -> bool {
    if html.is_empty() {
        return false;
    }
    let total: f64 = PAYWALL_PATTERNS
        .iter()
        .filter(|(pattern, _)| pattern.is_match(html))
        .map(|(_, weight)| weight)
        .sum();
    total >= PAYWALL_THRESHOLD
}

fn word_count_score(word_count: usize) -> f64 {
    if word_count < MIN_WORDS {
        return 0.0;
    }
    (word_count as f64 / IDEAL_WORDS as f64).min(1.0)
}

fn link_density_score(link_density: f64) -> f64 {
    if link_density > MAX_LINK_DENSITY {
        0.0
    } else {
        1.0 - link_density / MAX_LINK_DENSITY
    }
}

fn boilerplate_ratio(text: &str) -> f64 {
    let matches = BOILERPLATE_PATTERNS
        .iter()
        .filter(|p| p.is_match(text))
        .count();
    // Each matched pattern counts as roughly 5% boilerplate.
    (matches as f64 * 0.05).min(1.0)
}

fn sentence_length_score(avg_length: f64) -> f64 {
    if avg_length == 0.0 {
        return 0.0;
    }
    let deviation = (avg_length - IDEAL_SENTENCE_LENGTH).abs();
    (1.0 - deviation / IDEAL_SENTENCE_LENGTH).max(0.0)
}

/// Score extracted text against its source document.
pub fn score(
    text: &str,
    raw_html: &str,
    link_text: &str,
    publish_date: Option<DateTime<Utc>>,
) -> QualityMetrics {
    let word_count = text.split_whitespace().count();

    // Near-empty extractions get a token score without further analysis.
    if word_count < 20 {
        return QualityMetrics {
            word_count,
            link_density: 0.0,
            boilerplate_ratio: 0.0,
            content_density: 0.0,
            avg_sentence_length: 0.0,
            freshness: freshness_score(publish_date, Utc::now()),
            paywalled: detect_paywall(raw_html),
            overall: if word_count == 0 { 0.0 } else { 0.1 },
        };
    }

    let link_density = link_text.len() as f64 / text.len().max(1) as f64;

    let boilerplate = boilerplate_ratio(text);
    let boilerplate_score = (1.0 - boilerplate * 2.0).max(0.0);

    let content_density = if raw_html.is_empty() {
        0.5
    } else {
        text.len() as f64 / raw_html.len().max(1) as f64
    };
    let content_density_score = (content_density * 3.0).min(1.0);

    let sentences: Vec<&str> = SENTENCE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|s| s.len() > 3)
        .collect();
    let avg_sentence_length = if sentences.is_empty() {
        0.0
    } else {
        sentences.iter().map(|s| s.split_whitespace().count()).sum::<usize>() as f64
            / sentences.len() as f64
    };

    let base = WEIGHT_WORD_COUNT * word_count_score(word_count)
        + WEIGHT_LINK_DENSITY * link_density_score(link_density)
        + WEIGHT_BOILERPLATE * boilerplate_score
        + WEIGHT_CONTENT_DENSITY * content_density_score
        + WEIGHT_SENTENCE_LENGTH * sentence_length_score(avg_sentence_length);

    let freshness = freshness_score(publish_date, Utc::now());
    // Freshness nudges the composite up or down by at most ~10%.
    let mut overall = base * (0.9 + 0.2 * freshness);

    let paywalled = detect_paywall(raw_html);
    if paywalled {
        overall *= PAYWALL_PENALTY;
    }

    QualityMetrics {
        word_count,
        link_density,
        boilerplate_ratio: boilerplate,
        content_density,
        avg_sentence_length,
        freshness,
        paywalled,
        overall: overall.clamp(0.0, 1.0),
    }
}
