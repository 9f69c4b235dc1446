//! # Search Service
//!
//! Executes a subtopic's queries against the configured provider chain
//! under bounded concurrency, retries transient failures with the
//! router's backoff policy, and deduplicates results against the
//! run-wide `seen_urls` set using normalized URLs. A subtopic whose
//! queries all fail or come back empty is marked failed; it never
//! aborts the run.

pub mod providers;
pub mod url;

pub use providers::{RawSearchResult, SearchBackend, SearxngBackend, TavilyBackend};

use crate::config::SearchSettings;
use crate::error::ProviderError;
use crate::llm::router::backoff_delay;
use crate::state::SearchResult;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Outcome of running one subtopic's query batch.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// New, deduplicated results sorted by score descending.
    pub results: Vec<SearchResult>,
    /// Normalized URLs of those results, for the `seen_urls` union.
    pub new_urls: BTreeSet<String>,
    /// Human-readable failure descriptions, one per failed query.
    pub failures: Vec<String>,
}

pub struct SearchService {
    backends: Vec<Arc<dyn SearchBackend>>,
    settings: SearchSettings,
    semaphore: Arc<Semaphore>,
    /// Earliest instant the next outbound call may start; enforces the
    /// minimum inter-call delay across concurrent workers.
    next_call_at: Arc<Mutex<Instant>>,
    retries: u32,
}

impl SearchService {
    pub fn new(backends: Vec<Arc<dyn SearchBackend>>, settings: SearchSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            backends,
            semaphore,
            next_call_at: Arc::new(Mutex::new(Instant::now())),
            retries: 3,
            settings,
        }
    }

    /// Wait until this worker is allowed to start an outbound call.
    async fn pace(&self) {
        let delay = Duration::from_millis(self.settings.inter_call_delay_ms);
        let wait_until = {
            let mut next = self.next_call_at.lock().await;
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + delay;
            start
        };
        tokio::time::sleep_until(wait_until).await;
    }

    /// Run one query through the provider chain with retries.
    async fn query_one(&self, query: &str) -> Result<Vec<RawSearchResult>, String> {
        let mut last_error = String::from("no search providers configured");

        for backend in &self.backends {
            for attempt in 0..self.retries {
                self.pace().await;
                match backend
                    .search(query, self.settings.max_results, &self.settings.depth)
                    .await
                {
                    Ok(results) => return Ok(results),
                    Err(err) => {
                        last_error = format!("{}: {err}", backend.name());
                        tracing::warn!(
                            provider = backend.name(),
                            query = %query,
                            attempt,
                            error = %err,
                            "search_query_failed"
                        );
                        if !err.is_retryable() {
                            break;
                        }
                        if attempt + 1 < self.retries {
                            let rate_limited = matches!(err, ProviderError::RateLimited(_));
                            tokio::time::sleep(backoff_delay(attempt, rate_limited)).await;
                        }
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Execute all queries for one subtopic concurrently (bounded by
    /// the semaphore), then dedupe, filter, and sort the merged batch.
    pub async fn run_queries(
        &self,
        queries: &[String],
        subtopic_id: &str,
        seen_urls: &BTreeSet<String>,
    ) -> SearchOutcome {
        let mut handles = Vec::new();
        for query in queries {
            let semaphore = self.semaphore.clone();
            let query = query.clone();
            handles.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("search semaphore closed");
                let result = self.query_one(&query).await;
                (query, result)
            });
        }

        let outcomes = futures::future::join_all(handles).await;

        let mut raw: Vec<(String, RawSearchResult)> = Vec::new();
        let mut failures = Vec::new();
        for (query, outcome) in outcomes {
            match outcome {
                Ok(results) => {
                    for r in results {
                        raw.push((query.clone(), r));
                    }
                }
                Err(detail) => failures.push(format!("query '{query}' failed: {detail}")),
            }
        }

        // Score filter, then batch + run-wide dedup on normalized URLs.
        let mut batch_seen: BTreeSet<String> = BTreeSet::new();
        let mut results = Vec::new();
        let mut new_urls = BTreeSet::new();

        for (_query, item) in raw {
            if item.score < self.settings.min_score || item.url.is_empty() {
                continue;
            }
            let normalized = url::normalize_url(&item.url);
            if seen_urls.contains(&normalized) || !batch_seen.insert(normalized.clone()) {
                continue;
            }
            new_urls.insert(normalized);
            results.push(SearchResult {
                url: item.url,
                title: item.title,
                snippet: item.snippet,
                score: item.score,
                subtopic_id: subtopic_id.to_string(),
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.url.cmp(&b.url))
        });

        tracing::info!(
            subtopic_id,
            queries = queries.len(),
            unique = results.len(),
            failed_queries = failures.len(),
            "search_complete"
        );

        SearchOutcome {
            results,
            new_urls,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedBackend {
        results: Vec<RawSearchResult>,
    }

    #[async_trait]
    impl SearchBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _depth: &str,
        ) -> Result<Vec<RawSearchResult>, ProviderError> {
            Ok(self.results.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SearchBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
            _depth: &str,
        ) -> Result<Vec<RawSearchResult>, ProviderError> {
            Err(ProviderError::Permanent("provider down".into()))
        }
    }

    fn raw(url: &str, score: f64) -> RawSearchResult {
        RawSearchResult {
            url: url.to_string(),
            title: String::new(),
            snippet: String::new(),
            score,
        }
    }

    fn fast_settings() -> SearchSettings {
        SearchSettings {
            inter_call_delay_ms: 0,
            ..SearchSettings::default()
        }
    }

    #[tokio::test]
    async fn test_filters_dedups_and_sorts() {
        let backend = Arc::new(FixedBackend {
            results: vec![
                raw("https://a.example/low", 0.1),
                raw("https://a.example/mid", 0.7),
                raw("https://A.example/mid/", 0.7),
                raw("https://a.example/high", 0.9),
            ],
        });
        let service = SearchService::new(vec![backend], fast_settings());

        let outcome = service
            .run_queries(&["q1".to_string()], "st-1", &BTreeSet::new())
            .await;

        let urls: Vec<&str> = outcome.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/high", "https://a.example/mid"]);
        assert!(outcome.new_urls.contains("https://a.example/mid"));
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_skips_urls_already_seen_in_run() {
        let backend = Arc::new(FixedBackend {
            results: vec![raw("https://example.com/x", 0.9)],
        });
        let service = SearchService::new(vec![backend], fast_settings());

        let mut seen = BTreeSet::new();
        seen.insert("https://example.com/x".to_string());

        let outcome = service
            .run_queries(&["q".to_string()], "st-2", &seen)
            .await;
        assert!(outcome.results.is_empty());
        assert!(outcome.new_urls.is_empty());
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_next_provider() {
        let service = SearchService::new(
            vec![
                Arc::new(FailingBackend),
                Arc::new(FixedBackend {
                    results: vec![raw("https://b.example/", 0.8)],
                }),
            ],
            fast_settings(),
        );

        let outcome = service
            .run_queries(&["q".to_string()], "st-1", &BTreeSet::new())
            .await;
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn test_total_failure_reports_per_query() {
        let service = SearchService::new(vec![Arc::new(FailingBackend)], fast_settings());

        let outcome = service
            .run_queries(&["q1".to_string(), "q2".to_string()], "st-2", &BTreeSet::new())
            .await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[0].contains("failing"));
    }
}
