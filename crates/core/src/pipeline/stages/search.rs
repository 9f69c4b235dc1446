//! Web search stage with LLM query expansion.

use super::{output_schema, parse_llm_json};
use crate::error::PipelineError;
use crate::llm::{Intent, PromptSpec};
use crate::pipeline::context::RunContext;
use crate::state::{ErrorEntry, ResearchState, StateUpdate, SubtopicStatus};
use schemars::JsonSchema;
use serde::Deserialize;

const EXPAND_SYSTEM_PROMPT: &str = "\
You are a search query expansion specialist. Given a research subtopic, \
generate diverse web search query reformulations: one direct keyword \
query, one broader-context query, and one targeting specific details. \
Keep each under 15 words and vary the vocabulary between them.";

#[derive(Debug, Deserialize, JsonSchema)]
struct ExpandedQueries {
    variations: Vec<String>,
}

/// Expand a subtopic into `k` queries via the router, falling back to
/// the subtopic title when expansion fails.
async fn expand_queries(
    ctx: &RunContext,
    title: &str,
    description: &str,
    k: usize,
    parent_id: &str,
) -> Vec<String> {
    let user = if description.is_empty() {
        format!("Subtopic: {title}\nGenerate {k} query variations.")
    } else {
        format!("Subtopic: {title}\nContext: {description}\nGenerate {k} query variations.")
    };
    let spec = PromptSpec::new(EXPAND_SYSTEM_PROMPT, user)
        .with_schema(output_schema::<ExpandedQueries>());

    match ctx
        .router
        .call(spec, Intent::Plan, ctx.current_tier(), "search", parent_id)
        .await
    {
        Ok(call) => match parse_llm_json::<ExpandedQueries>(&call.text) {
            Ok(expanded) if !expanded.variations.is_empty() => {
                expanded.variations.into_iter().take(k).collect()
            }
            _ => vec![title.to_string()],
        },
        Err(err) => {
            tracing::warn!(error = %err, "expand_queries_failed");
            vec![title.to_string()]
        }
    }
}

/// Search the web for the current subtopic. Never fails the run: a
/// subtopic whose queries all fail is marked failed and skipped.
pub async fn run(
    ctx: &RunContext,
    state: &ResearchState,
    parent_id: &str,
) -> Result<StateUpdate, PipelineError> {
    let Some(subtopic) = state.current_subtopic() else {
        return Ok(StateUpdate::default());
    };
    let tier = ctx.current_tier();

    // CACHED and below work from already-gathered pages only.
    if !tier.allows_gathering() {
        tracing::info!(tier = tier.as_str(), "search_skipped_by_tier");
        return Ok(StateUpdate::default());
    }
    if ctx.shutdown.should_stop() {
        return Ok(StateUpdate::default());
    }

    let k = tier.expansion_count();
    let queries = if subtopic.search_queries.is_empty() {
        expand_queries(ctx, &subtopic.title, &subtopic.description, k, parent_id).await
    } else {
        subtopic.search_queries.iter().take(k.max(1)).cloned().collect()
    };

    tracing::info!(
        subtopic_id = %subtopic.id,
        queries = queries.len(),
        "search_start"
    );

    let outcome = ctx
        .search
        .run_queries(&queries, &subtopic.id, &state.seen_urls)
        .await;

    let mut update = StateUpdate::default();
    for failure in &outcome.failures {
        update
            .errors
            .push(ErrorEntry::for_subtopic("search", &subtopic.id, failure.clone()));
    }
    if outcome.results.is_empty() {
        tracing::warn!(subtopic_id = %subtopic.id, "search_empty_marking_failed");
        update.subtopic_status = Some((subtopic.id.clone(), SubtopicStatus::Failed));
    }
    update.search_results = outcome.results;
    update.seen_urls = outcome.new_urls;

    Ok(update)
}
