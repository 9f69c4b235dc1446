//! # Scraper
//!
//! Fetches search-result URLs under bounded concurrency, extracts and
//! sanitizes their content, and quality-scores every page. Low-quality
//! primary extractions get one more chance through the JS-capable
//! fallback extractor. Failed URLs are recorded as errors and never
//! abort the run. Pages come back in deterministic
//! `(subtopic_id, -quality_score, url)` order regardless of completion
//! order.

pub mod extract;
pub mod quality;
pub mod sanitize;

pub use extract::{Extraction, ExtractorBackend, HttpExtractor, RenderingExtractor};

use crate::config::ScrapeSettings;
use crate::error::ProviderError;
use crate::llm::router::backoff_delay;
use crate::state::{ErrorEntry, ScrapedPage, SearchResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of scraping one batch of search results.
#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub pages: Vec<ScrapedPage>,
    pub errors: Vec<ErrorEntry>,
}

pub struct Scraper {
    primary: Arc<dyn ExtractorBackend>,
    fallback: Option<Arc<dyn ExtractorBackend>>,
    settings: ScrapeSettings,
    retries: u32,
}

impl Scraper {
    pub fn new(
        primary: Arc<dyn ExtractorBackend>,
        fallback: Option<Arc<dyn ExtractorBackend>>,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            primary,
            fallback,
            settings,
            retries: 3,
        }
    }

    /// Fetch one URL through an extractor with transient-failure retries.
    async fn extract_with_retry(
        extractor: &Arc<dyn ExtractorBackend>,
        url: &str,
        timeout: Duration,
        retries: u32,
    ) -> Result<Extraction, ProviderError> {
        let mut last = ProviderError::Transient("not attempted".into());
        for attempt in 0..retries {
            match extractor.extract(url, timeout).await {
                Ok(extraction) => return Ok(extraction),
                Err(err) => {
                    tracing::warn!(
                        extractor = extractor.name(),
                        url,
                        attempt,
                        error = %err,
                        "extract_failed"
                    );
                    let retryable = err.is_retryable();
                    let rate_limited = matches!(err, ProviderError::RateLimited(_));
                    last = err;
                    if !retryable {
                        break;
                    }
                    if attempt + 1 < retries {
                        tokio::time::sleep(backoff_delay(attempt, rate_limited)).await;
                    }
                }
            }
        }
        Err(last)
    }

    /// Extract, score, and package one search result into a page.
    async fn scrape_one(
        primary: Arc<dyn ExtractorBackend>,
        fallback: Option<Arc<dyn ExtractorBackend>>,
        settings: ScrapeSettings,
        retries: u32,
        target: SearchResult,
    ) -> Result<Option<ScrapedPage>, ErrorEntry> {
        let timeout = Duration::from_secs(settings.timeout_s);

        let mut extraction =
            Self::extract_with_retry(&primary, &target.url, timeout, retries)
                .await
                .map_err(|err| {
                    ErrorEntry::for_subtopic(
                        "scrape",
                        &target.subtopic_id,
                        format!("{}: {err}", target.url),
                    )
                })?;

        let mut metrics = quality::score(
            &extraction.content,
            &extraction.raw_html,
            &extraction.link_text,
            extraction.publish_date,
        );

        // Thin primary extraction: give the rendering extractor a shot
        // and keep whichever came out better.
        if metrics.overall < settings.fallback_threshold {
            if let Some(fallback) = &fallback {
                if let Ok(rendered) =
                    Self::extract_with_retry(fallback, &target.url, timeout, retries).await
                {
                    let rendered_metrics = quality::score(
                        &rendered.content,
                        &rendered.raw_html,
                        &rendered.link_text,
                        rendered.publish_date,
                    );
                    if rendered_metrics.overall > metrics.overall {
                        extraction = rendered;
                        metrics = rendered_metrics;
                    }
                }
            }
        }

        if metrics.overall < settings.quality_reject {
            tracing::info!(
                url = %target.url,
                quality = metrics.overall,
                "scrape_rejected"
            );
            return Ok(None);
        }

        let mut content = sanitize::sanitize_content(&extraction.content);
        if content.len() > settings.max_content_length {
            content.truncate(settings.max_content_length);
        }
        let word_count = content.split_whitespace().count();
        let flagged = metrics.overall < settings.quality_accept;

        if flagged {
            tracing::info!(url = %target.url, quality = metrics.overall, "scrape_flagged");
        }

        Ok(Some(ScrapedPage {
            url: target.url,
            title: target.title,
            content,
            quality_score: metrics.overall,
            word_count,
            subtopic_id: target.subtopic_id,
            flagged,
        }))
    }

    /// Scrape a batch concurrently, bounded by `max_concurrent`.
    pub async fn scrape(&self, targets: Vec<SearchResult>) -> ScrapeOutcome {
        let total = targets.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();

        for target in targets {
            let semaphore = semaphore.clone();
            let primary = self.primary.clone();
            let fallback = self.fallback.clone();
            let settings = self.settings.clone();
            let retries = self.retries;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                Self::scrape_one(primary, fallback, settings, retries, target).await
            });
        }

        let mut outcome = ScrapeOutcome::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(Some(page))) => outcome.pages.push(page),
                Ok(Ok(None)) => {}
                Ok(Err(error)) => outcome.errors.push(error),
                Err(join_err) => outcome.errors.push(ErrorEntry::recoverable(
                    "scrape",
                    format!("scrape task panicked: {join_err}"),
                )),
            }
        }

        // Completion order is nondeterministic; impose the contract
        // ordering before anything downstream consumes the batch.
        outcome.pages.sort_by(|a, b| {
            a.subtopic_id
                .cmp(&b.subtopic_id)
                .then_with(|| {
                    b.quality_score
                        .partial_cmp(&a.quality_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.url.cmp(&b.url))
        });

        tracing::info!(
            total,
            scraped = outcome.pages.len(),
            failed = outcome.errors.len(),
            "scrape_complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FixedExtractor {
        text: String,
    }

    impl FixedExtractor {
        fn article(words: usize) -> Self {
            let sentence =
                "Vector databases index high dimensional embeddings for similarity search workloads. ";
            let mut text = String::new();
            while text.split_whitespace().count() < words {
                text.push_str(sentence);
                if text.split_whitespace().count() % 60 == 0 {
                    text.push_str("\n\n");
                }
            }
            Self { text }
        }
    }

    #[async_trait::async_trait]
    impl ExtractorBackend for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<Extraction, ProviderError> {
            Ok(Extraction {
                content: self.text.clone(),
                mime: "text/html".into(),
                fetched_at: Utc::now(),
                publish_date: Some(Utc::now()),
                raw_html: format!("<p>{}</p>", self.text),
                link_text: String::new(),
            })
        }
    }

    struct FailingExtractor;

    #[async_trait::async_trait]
    impl ExtractorBackend for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn extract(
            &self,
            url: &str,
            _timeout: Duration,
        ) -> Result<Extraction, ProviderError> {
            Err(ProviderError::Permanent(format!("unreachable: {url}")))
        }
    }

    fn target(url: &str, subtopic: &str) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: "page".into(),
            snippet: String::new(),
            score: 0.9,
            subtopic_id: subtopic.to_string(),
        }
    }

    #[tokio::test]
    async fn test_scrape_batch_orders_deterministically() {
        let scraper = Scraper::new(
            Arc::new(FixedExtractor::article(400)),
            None,
            ScrapeSettings::default(),
        );

        let outcome = scraper
            .scrape(vec![
                target("https://b.example/", "st-1"),
                target("https://a.example/", "st-1"),
            ])
            .await;

        assert_eq!(outcome.pages.len(), 2);
        // Equal quality, so URL breaks the tie.
        assert_eq!(outcome.pages[0].url, "https://a.example/");
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failures_recorded_not_fatal() {
        let scraper = Scraper::new(
            Arc::new(FailingExtractor),
            None,
            ScrapeSettings::default(),
        );

        let outcome = scraper.scrape(vec![target("https://x.example/", "st-2")]).await;
        assert!(outcome.pages.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].subtopic_id.as_deref(), Some("st-2"));
        assert!(outcome.errors[0].recoverable);
    }

    #[tokio::test]
    async fn test_low_quality_pages_are_dropped() {
        let scraper = Scraper::new(
            Arc::new(FixedExtractor {
                text: "too thin".to_string(),
            }),
            None,
            ScrapeSettings::default(),
        );

        let outcome = scraper.scrape(vec![target("https://thin.example/", "st-1")]).await;
        assert!(outcome.pages.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_rescues_thin_primary_extraction() {
        let scraper = Scraper::new(
            Arc::new(FixedExtractor {
                text: "almost nothing here".to_string(),
            }),
            Some(Arc::new(FixedExtractor::article(500))),
            ScrapeSettings::default(),
        );

        let outcome = scraper.scrape(vec![target("https://js.example/", "st-1")]).await;
        assert_eq!(outcome.pages.len(), 1);
        assert!(outcome.pages[0].quality_score > 0.5);
    }
}
