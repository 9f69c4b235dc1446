//! The LLM provider adapter interface.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the caller is using the model for. Drives chain selection
/// together with the degradation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Plan,
    Summarize,
    Synthesize,
    Judge,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Summarize => "summarize",
            Self::Synthesize => "synthesize",
            Self::Judge => "judge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Prompt parts in cache-stable composition order: static output
/// schema, static system instructions, append-only prior turns, then
/// the dynamic user message. Vendors with prompt caching see a stable
/// byte prefix across calls that share the static parts.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub system: String,
    /// Structured-output schema, rendered canonically into the system
    /// message so the prefix never wobbles on key order.
    pub schema: Option<serde_json::Value>,
    pub history: Vec<ChatMessage>,
    pub user: String,
}

impl PromptSpec {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            schema: None,
            history: Vec::new(),
            user: user.into(),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Flatten into the fixed message order.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        let mut system = self.system;
        if let Some(schema) = &self.schema {
            system.push_str("\n\nRespond with ONLY a JSON object matching this schema:\n");
            system.push_str(&super::canonical_json(schema));
        }

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(self.history);
        messages.push(ChatMessage::user(self.user));
        messages
    }
}

/// A single completion request handed to a provider adapter.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// A provider adapter's response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: Option<u64>,
    /// Provider-reported cost; 0.0 means unknown and the router prices
    /// the call from its table instead.
    pub cost_usd: f64,
    pub model_id: String,
}

/// An LLM provider the router can drive. Implementations map their
/// transport failures onto [`ProviderError`] so the retry policy stays
/// uniform across vendors.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Short provider name used in events and usage records.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}
