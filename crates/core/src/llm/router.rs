//! The model router: fallback chains, retries, usage accounting.
//!
//! One logical `call` walks an ordered provider chain chosen from the
//! degradation tier and intent. Each provider gets a bounded retry
//! budget with exponential backoff; a terminal failure advances the
//! chain and the retry budget restarts. Exhausting the whole chain is
//! `ModelCallExhausted`. Every attempt is visible in the event log and
//! every success is metered into the budget tracker before returning.

use super::backend::{CompletionBackend, CompletionRequest, Intent, PromptSpec};
use crate::budget::{BudgetTracker, UsageRecord};
use crate::config::LlmSettings;
use crate::degrade::{DegradationController, DegradationTier};
use crate::error::{PipelineError, ProviderError};
use crate::event::{Event, EventKind, EventLog};
use anyhow::Result;
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff with jitter, shared by the router and the
/// search service. Rate-limited failures back off twice as hard.
pub fn backoff_delay(attempt: u32, rate_limited: bool) -> Duration {
    let mut base = BACKOFF_BASE * 2u32.saturating_pow(attempt);
    if rate_limited {
        base *= 2;
    }
    let capped = base.min(BACKOFF_CAP);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    capped + jitter
}

/// Role a provider plays in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    /// Highest-quality general model.
    Primary,
    /// Secondary vendor of comparable capability.
    Fallback,
    /// Cheap/fast model for degraded tiers.
    Budget,
}

/// One provider in the router's table.
pub struct RouterEntry {
    pub role: ProviderRole,
    pub model: String,
    pub backend: Arc<dyn CompletionBackend>,
}

/// Outcome of a successful routed call.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub provider: String,
    pub model: String,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

pub struct ModelRouter {
    entries: Vec<RouterEntry>,
    temperature: f64,
    max_tokens: u32,
    call_timeout: Duration,
    retries: u32,
    budget: Arc<BudgetTracker>,
    events: Arc<EventLog>,
    degrade: Arc<Mutex<DegradationController>>,
}

impl ModelRouter {
    pub fn new(
        entries: Vec<RouterEntry>,
        settings: &LlmSettings,
        budget: Arc<BudgetTracker>,
        events: Arc<EventLog>,
        degrade: Arc<Mutex<DegradationController>>,
    ) -> Self {
        Self {
            entries,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            call_timeout: Duration::from_secs(settings.timeout_s),
            retries: settings.retries.max(1),
            budget,
            events,
            degrade,
        }
    }

    /// Build the default provider table from settings: Anthropic as
    /// primary and budget roles, OpenAI as the fallback vendor.
    pub fn from_settings(
        settings: &LlmSettings,
        budget: Arc<BudgetTracker>,
        events: Arc<EventLog>,
        degrade: Arc<Mutex<DegradationController>>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_s);
        let anthropic: Arc<dyn CompletionBackend> =
            Arc::new(super::providers::AnthropicBackend::from_env(timeout)?);
        let openai: Arc<dyn CompletionBackend> =
            Arc::new(super::providers::OpenAiBackend::from_env(timeout)?);

        let entries = vec![
            RouterEntry {
                role: ProviderRole::Primary,
                model: settings.primary_model.clone(),
                backend: anthropic.clone(),
            },
            RouterEntry {
                role: ProviderRole::Fallback,
                model: settings.fallback_model.clone(),
                backend: openai,
            },
            RouterEntry {
                role: ProviderRole::Budget,
                model: settings.budget_model.clone(),
                backend: anthropic,
            },
        ];
        Ok(Self::new(entries, settings, budget, events, degrade))
    }

    /// Ordered roles to attempt for a (tier, intent) pair. The budget
    /// model leads once the tier degrades; summarization moves there
    /// first since it is the highest-volume intent.
    fn chain_roles(tier: DegradationTier, intent: Intent) -> &'static [ProviderRole] {
        use DegradationTier::*;
        use ProviderRole::*;
        match (tier, intent) {
            (Full, _) => &[Primary, Fallback, Budget],
            (Reduced, Intent::Summarize) => &[Budget, Fallback],
            (Reduced, _) => &[Primary, Fallback, Budget],
            (Cached | Partial, _) => &[Budget, Fallback],
        }
    }

    fn chain_for(&self, tier: DegradationTier, intent: Intent) -> Vec<&RouterEntry> {
        Self::chain_roles(tier, intent)
            .iter()
            .filter_map(|role| self.entries.iter().find(|e| e.role == *role))
            .collect()
    }

    /// Execute one logical call through the fallback chain.
    pub async fn call(
        &self,
        spec: PromptSpec,
        intent: Intent,
        tier: DegradationTier,
        node: &str,
        parent_id: &str,
    ) -> Result<ModelCall, PipelineError> {
        let messages = spec.into_messages();
        let chain = self.chain_for(tier, intent);
        let mut last_error = String::from("no providers configured");

        for entry in &chain {
            let request = CompletionRequest {
                model: entry.model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            for attempt in 0..self.retries {
                let step_id = crate::event::generate_step_id(node);
                let _ = self.events.append(
                    &Event::new(EventKind::NodeEnter, node)
                        .with_step(&step_id)
                        .with_parent(parent_id)
                        .with_payload(json!({
                            "provider": entry.backend.name(),
                            "model": entry.model,
                            "intent": intent.as_str(),
                            "attempt": attempt,
                        })),
                );

                let started = Instant::now();
                let outcome =
                    match tokio::time::timeout(self.call_timeout, entry.backend.complete(&request))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Transient(format!(
                            "call timed out after {:?}",
                            self.call_timeout
                        ))),
                    };
                let latency_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(response) => {
                        let cost_usd = if response.cost_usd > 0.0 {
                            response.cost_usd
                        } else {
                            BudgetTracker::estimate_cost(
                                &entry.model,
                                response.input_tokens,
                                response.output_tokens,
                            )
                        };

                        let _ = self.events.append(
                            &Event::new(EventKind::NodeExit, node)
                                .with_step(&step_id)
                                .with_parent(parent_id)
                                .with_payload(json!({
                                    "provider": entry.backend.name(),
                                    "model": response.model_id,
                                    "input_tokens": response.input_tokens,
                                    "output_tokens": response.output_tokens,
                                    "cost_usd": cost_usd,
                                    "latency_ms": latency_ms,
                                })),
                        );

                        // Meter usage before handing the result back.
                        self.budget.add(UsageRecord {
                            provider: entry.backend.name().to_string(),
                            model: entry.model.clone(),
                            input_tokens: response.input_tokens,
                            output_tokens: response.output_tokens,
                            cost_usd,
                            node: node.to_string(),
                        });
                        self.degrade
                            .lock()
                            .expect("degrade lock poisoned")
                            .on_call_success();

                        return Ok(ModelCall {
                            text: response.text,
                            input_tokens: response.input_tokens,
                            output_tokens: response.output_tokens,
                            provider: entry.backend.name().to_string(),
                            model: entry.model.clone(),
                            cost_usd,
                            latency_ms,
                        });
                    }
                    Err(err) => {
                        last_error = format!("{}: {err}", entry.backend.name());
                        let _ = self.events.append(
                            &Event::new(EventKind::NodeExit, node)
                                .with_step(&step_id)
                                .with_parent(parent_id)
                                .with_payload(json!({
                                    "provider": entry.backend.name(),
                                    "error": err.to_string(),
                                    "latency_ms": latency_ms,
                                })),
                        );
                        tracing::warn!(
                            provider = entry.backend.name(),
                            model = %entry.model,
                            attempt,
                            error = %err,
                            "model_call_failed"
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

        // The whole chain failed; let the degradation controller react.
        let change = self
            .degrade
            .lock()
            .expect("degrade lock poisoned")
            .on_chain_exhausted();
        if let Some(change) = change {
            let _ = self.events.append(
                &Event::new(EventKind::TierChange, node)
                    .with_parent(parent_id)
                    .with_payload(json!({
                        "from": change.from.as_str(),
                        "to": change.to.as_str(),
                        "reason": change.reason,
                    })),
            );
        }

        Err(PipelineError::ModelCallExhausted {
            intent: intent.as_str().to_string(),
            detail: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostSettings;
    use crate::llm::backend::CompletionResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedBackend {
        name: &'static str,
        calls: AtomicU32,
        fail_with: Option<fn() -> ProviderError>,
    }

    impl ScriptedBackend {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                calls: AtomicU32::new(0),
                fail_with: None,
            }
        }

        fn failing(name: &'static str, f: fn() -> ProviderError) -> Self {
            Self {
                name,
                calls: AtomicU32::new(0),
                fail_with: Some(f),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(CompletionResponse {
                text: "ok".to_string(),
                input_tokens: 100,
                output_tokens: 50,
                cached_tokens: None,
                cost_usd: 0.01,
                model_id: request.model.clone(),
            })
        }
    }

    fn router_with(
        entries: Vec<RouterEntry>,
    ) -> (
        ModelRouter,
        Arc<BudgetTracker>,
        Arc<EventLog>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(EventLog::open(dir.path().join("events.jsonl")).unwrap());
        let budget = Arc::new(BudgetTracker::new(&CostSettings::default()));
        let degrade = Arc::new(Mutex::new(DegradationController::new(DegradationTier::Full)));
        let settings = LlmSettings {
            retries: 2,
            ..LlmSettings::default()
        };
        let router = ModelRouter::new(entries, &settings, budget.clone(), events.clone(), degrade);
        (router, budget, events, dir)
    }

    fn entry(role: ProviderRole, backend: ScriptedBackend) -> RouterEntry {
        RouterEntry {
            role,
            model: format!("{}-model", backend.name),
            backend: Arc::new(backend),
        }
    }

    #[tokio::test]
    async fn test_success_meters_budget_and_emits_events() {
        let (router, budget, events, _dir) =
            router_with(vec![entry(ProviderRole::Primary, ScriptedBackend::ok("alpha"))]);

        let call = router
            .call(
                PromptSpec::new("sys", "user"),
                Intent::Plan,
                DegradationTier::Full,
                "plan",
                "parent-1",
            )
            .await
            .unwrap();

        assert_eq!(call.provider, "alpha");
        assert_eq!(call.cost_usd, 0.01);
        assert!(budget.total_cost() > 0.0);

        let logged = events.read_events().unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].event, EventKind::NodeEnter);
        assert_eq!(logged[1].event, EventKind::NodeExit);
        assert_eq!(logged[0].payload["provider"], "alpha");
        assert_eq!(logged[0].parent_id, "parent-1");
    }

    #[tokio::test]
    async fn test_permanent_failure_advances_chain_without_retry() {
        let failing = ScriptedBackend::failing("bad", || ProviderError::Permanent("401".into()));
        let (router, _, _, _dir) = router_with(vec![
            entry(ProviderRole::Primary, failing),
            entry(ProviderRole::Fallback, ScriptedBackend::ok("good")),
        ]);

        let call = router
            .call(
                PromptSpec::new("sys", "user"),
                Intent::Synthesize,
                DegradationTier::Full,
                "synthesize",
                "",
            )
            .await
            .unwrap();

        assert_eq!(call.provider, "good");
    }

    #[tokio::test]
    async fn test_whole_chain_failure_is_exhaustion() {
        let (router, _, _, _dir) = router_with(vec![entry(
            ProviderRole::Primary,
            ScriptedBackend::failing("bad", || ProviderError::Permanent("boom".into())),
        )]);

        let err = router
            .call(
                PromptSpec::new("sys", "user"),
                Intent::Plan,
                DegradationTier::Full,
                "plan",
                "",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ModelCallExhausted { .. }));
    }

    #[tokio::test]
    async fn test_degraded_summarize_starts_on_budget_model() {
        let (router, _, _, _dir) = router_with(vec![
            entry(ProviderRole::Primary, ScriptedBackend::ok("primary")),
            entry(ProviderRole::Budget, ScriptedBackend::ok("budget")),
        ]);

        let call = router
            .call(
                PromptSpec::new("sys", "user"),
                Intent::Summarize,
                DegradationTier::Reduced,
                "summarize",
                "",
            )
            .await
            .unwrap();

        assert_eq!(call.provider, "budget");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = backoff_delay(0, false);
        assert!(first >= Duration::from_secs(1));
        assert!(first < Duration::from_secs(2));

        let capped = backoff_delay(10, false);
        assert!(capped <= BACKOFF_CAP + Duration::from_millis(500));
    }
}
