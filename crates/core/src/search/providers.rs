//! Web search provider adapters.

use crate::error::ProviderError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// A raw result from a search provider, before attribution and
/// filtering.
#[derive(Debug, Clone)]
pub struct RawSearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

/// A web search provider the search service can drive.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: &str,
    ) -> Result<Vec<RawSearchResult>, ProviderError>;
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    if status.as_u16() == 429 {
        ProviderError::RateLimited(detail)
    } else if status.is_server_error() {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Permanent(detail)
    }
}

/// Tavily search API adapter.
pub struct TavilyBackend {
    client: reqwest::Client,
    api_key: String,
}

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

impl TavilyBackend {
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY").context("TAVILY_API_KEY is not set")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl SearchBackend for TavilyBackend {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        depth: &str,
    ) -> Result<Vec<RawSearchResult>, ProviderError> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": depth,
        });

        let response = self
            .client
            .post(TAVILY_API_URL)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Permanent(format!("unparseable response: {e}")))?;

        let results = value["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| RawSearchResult {
                        url: item["url"].as_str().unwrap_or_default().to_string(),
                        title: item["title"].as_str().unwrap_or_default().to_string(),
                        snippet: item["content"].as_str().unwrap_or_default().to_string(),
                        score: item["score"].as_f64().unwrap_or(0.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }
}

/// SearXNG adapter, usable as a self-hosted fallback provider.
pub struct SearxngBackend {
    client: reqwest::Client,
    base_url: String,
}

impl SearxngBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_env(timeout: Duration) -> Result<Self> {
        let base_url = std::env::var("SEARXNG_URL").context("SEARXNG_URL is not set")?;
        Self::new(base_url.trim_end_matches('/').to_string(), timeout)
    }
}

#[async_trait]
impl SearchBackend for SearxngBackend {
    fn name(&self) -> &str {
        "searxng"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
        _depth: &str,
    ) -> Result<Vec<RawSearchResult>, ProviderError> {
        let url = format!(
            "{}/search?q={}&format=json",
            self.base_url,
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Permanent(format!("unparseable response: {e}")))?;

        let results = value["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .map(|(rank, item)| RawSearchResult {
                        url: item["url"].as_str().unwrap_or_default().to_string(),
                        title: item["title"].as_str().unwrap_or_default().to_string(),
                        snippet: item["content"].as_str().unwrap_or_default().to_string(),
                        // SearXNG omits scores in JSON output; derive a
                        // rank-based one so downstream filtering works.
                        score: item["score"]
                            .as_f64()
                            .unwrap_or_else(|| (1.0 - rank as f64 * 0.05).max(0.1)),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }
}
