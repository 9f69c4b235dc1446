//! Content extractor adapters.
//!
//! The primary extractor fetches HTML over plain HTTP and strips it to
//! readable text. The rendering extractor proxies through a JS-capable
//! endpoint for pages the primary handles poorly; the scraper retries
//! low-quality extractions against it.

use crate::error::ProviderError;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Output of one extraction, enough for quality scoring downstream.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub content: String,
    pub mime: String,
    pub fetched_at: DateTime<Utc>,
    pub publish_date: Option<DateTime<Utc>>,
    /// Raw document, kept for paywall and density analysis.
    pub raw_html: String,
    /// Concatenated anchor text, for link-density scoring.
    pub link_text: String,
}

/// A content extraction provider.
#[async_trait::async_trait]
pub trait ExtractorBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, url: &str, timeout: Duration) -> Result<Extraction, ProviderError>;
}

static STRIP_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<iframe\b.*?</iframe>|<object\b.*?</object>|<svg\b.*?</svg>|<head\b.*?</head>",
    )
    .unwrap()
});
static COMMENTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static ANCHOR_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap());
static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|br|h[1-6]|li|tr|section|article|blockquote)[^>]*>").unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static META_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]+(?:property|name)\s*=\s*["'](?:article:published_time|article:modified_time|og:article:published_time|datePublished|date|DC\.date(?:\.issued)?|pubdate|publishdate|publish_date)["'][^>]+content\s*=\s*["']([^"']+)["']"#,
    )
    .unwrap()
});
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").unwrap());

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Reduce an HTML document to readable plain text.
pub fn html_to_text(html: &str) -> String {
    let without_comments = COMMENTS.replace_all(html, " ");
    let without_blocks = STRIP_BLOCKS.replace_all(&without_comments, " ");
    let with_breaks = BLOCK_BREAK.replace_all(&without_blocks, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);

    // Collapse intra-line whitespace, keep paragraph breaks.
    let mut lines: Vec<String> = Vec::new();
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        } else if lines.last().map(|l| !l.is_empty()).unwrap_or(false) {
            lines.push(String::new());
        }
    }
    lines.join("\n")
}

/// Concatenated anchor text of the document.
pub fn collect_link_text(html: &str) -> String {
    ANCHOR_TEXT
        .captures_iter(html)
        .map(|c| {
            let inner = ANY_TAG.replace_all(&c[1], " ");
            decode_entities(&inner).trim().to_string()
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best-effort publication date from meta tags, ISO dates only.
pub fn detect_publish_date(html: &str) -> Option<DateTime<Utc>> {
    let captured = META_DATE.captures(html)?;
    let raw = captured.get(1)?.as_str();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date = ISO_DATE.captures(raw)?.get(1)?.as_str();
    let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        naive.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}

fn extraction_from_html(html: String, mime: String) -> Extraction {
    Extraction {
        content: html_to_text(&html),
        mime,
        fetched_at: Utc::now(),
        publish_date: detect_publish_date(&html),
        link_text: collect_link_text(&html),
        raw_html: html,
    }
}

/// Plain-HTTP extractor: fetch and strip.
pub struct HttpExtractor {
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("prospector-agent/0.3")
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ExtractorBackend for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(&self, url: &str, timeout: Duration) -> Result<Extraction, ProviderError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = format!("{status} for {url}");
            return Err(if status.as_u16() == 429 {
                ProviderError::RateLimited(detail)
            } else if status.is_server_error() {
                ProviderError::Transient(detail)
            } else {
                ProviderError::Permanent(detail)
            });
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .split(';')
            .next()
            .unwrap_or("text/html")
            .to_string();

        let html = response.text().await.map_err(classify_transport)?;
        Ok(extraction_from_html(html, mime))
    }
}

/// Extractor that proxies through a JS-rendering endpoint (the
/// fallback for pages the plain fetch extracts poorly).
pub struct RenderingExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl RenderingExtractor {
    pub fn from_env() -> Result<Self> {
        let endpoint =
            std::env::var("PROSPECTOR_RENDER_URL").context("PROSPECTOR_RENDER_URL is not set")?;
        let client = reqwest::Client::builder()
            .user_agent("prospector-agent/0.3")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl ExtractorBackend for RenderingExtractor {
    fn name(&self) -> &str {
        "render"
    }

    async fn extract(&self, url: &str, timeout: Duration) -> Result<Extraction, ProviderError> {
        let request_url = format!(
            "{}?url={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(url)
        );

        let response = self
            .client
            .get(&request_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Transient(format!("{status} from renderer")));
        }

        let html = response.text().await.map_err(classify_transport)?;
        Ok(extraction_from_html(html, "text/html".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_strips_scripts_and_tags() {
        let html = r#"<html><head><title>t</title></head><body>
            <script>alert(1)</script>
            <p>First paragraph.</p>
            <div>Second &amp; third.</div>
        </body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second & third."));
        assert!(!text.contains("alert"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_collect_link_text() {
        let html = r#"<p>Read <a href="/a">the docs</a> and <a href="/b"><b>more</b></a>.</p>"#;
        assert_eq!(collect_link_text(html), "the docs more");
    }

    #[test]
    fn test_detect_publish_date_from_meta() {
        let html = r#"<meta property="article:published_time" content="2024-03-01T12:00:00Z">"#;
        let date = detect_publish_date(html).unwrap();
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-03-01");

        let bare = r#"<meta name="datePublished" content="2023-11-20">"#;
        assert!(detect_publish_date(bare).is_some());

        assert!(detect_publish_date("<p>no dates here</p>").is_none());
    }
}
