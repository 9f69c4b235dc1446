//! Reqwest-based provider adapters.
//!
//! API keys come from the environment at construction time, never from
//! config files. HTTP failures map onto the shared retry
//! classification: 429 is rate-limited, 5xx and transport errors are
//! transient, other 4xx are permanent.

use super::backend::{CompletionBackend, CompletionRequest, CompletionResponse, Role};
use crate::error::ProviderError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

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

fn classify_transport(err: reqwest::Error) -> ProviderError {
    // Connect failures and timeouts are worth retrying; anything else
    // (builder, body decode) is not.
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::Permanent(err.to_string())
    }
}

/// Anthropic messages API adapter.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicBackend {
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY is not set")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, api_key })
    }

    fn build_body(request: &CompletionRequest) -> Value {
        // Anthropic takes the system prompt as a top-level field.
        let system: String = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::System => unreachable!(),
                    },
                    "content": m.content,
                })
            })
            .collect();

        json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": system,
            "messages": messages,
        })
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Permanent(format!("unparseable response: {e}")))?;

        let text = value["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .unwrap_or_default()
            .to_string();

        Ok(CompletionResponse {
            text,
            input_tokens: value["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: value["usage"]["output_tokens"].as_u64().unwrap_or(0),
            cached_tokens: value["usage"]["cache_read_input_tokens"].as_u64(),
            cost_usd: 0.0,
            model_id: value["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
        })
    }
}

/// OpenAI chat-completions adapter.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    /// Point at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Permanent(format!("unparseable response: {e}")))?;

        Ok(CompletionResponse {
            text: value["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            input_tokens: value["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: value["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            cached_tokens: value["usage"]["prompt_tokens_details"]["cached_tokens"].as_u64(),
            cost_usd: 0.0,
            model_id: value["model"]
                .as_str()
                .unwrap_or(&request.model)
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backend::ChatMessage;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            ProviderError::Permanent(_)
        ));
    }

    #[test]
    fn test_anthropic_body_lifts_system_prompt() {
        let request = CompletionRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![
                ChatMessage::system("be terse"),
                ChatMessage::user("hello"),
            ],
            temperature: 0.1,
            max_tokens: 64,
        };
        let body = AnthropicBackend::build_body(&request);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
