//! Query decomposition stage.

use super::{output_schema, parse_llm_json};
use crate::error::PipelineError;
use crate::llm::{Intent, PromptSpec};
use crate::pipeline::context::RunContext;
use crate::state::{ResearchState, StateUpdate, Subtopic};
use schemars::JsonSchema;
use serde::Deserialize;

/// Upper bound on subtopics kept from the planner.
const MAX_SUBTOPICS: usize = 7;

const SYSTEM_PROMPT: &str = "\
You are a research planner. Decompose the user's research query into \
3-7 focused subtopics that together cover the question. Each subtopic \
gets a short title, a one-sentence description of what to investigate, \
and up to three concrete web search queries.";

#[derive(Debug, Deserialize, JsonSchema)]
struct PlannedSubtopic {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    search_queries: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PlannerOutput {
    subtopics: Vec<PlannedSubtopic>,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

/// Decompose the query into subtopics. Fatal if the model cannot
/// produce a single parseable subtopic.
pub async fn run(
    ctx: &RunContext,
    state: &ResearchState,
    parent_id: &str,
) -> Result<StateUpdate, PipelineError> {
    tracing::info!(query = %state.query, "plan_start");

    let spec = PromptSpec::new(
        SYSTEM_PROMPT,
        format!("Research query: {}", state.query),
    )
    .with_schema(output_schema::<PlannerOutput>());

    let call = ctx
        .router
        .call(spec, Intent::Plan, ctx.current_tier(), "plan", parent_id)
        .await?;

    let output: PlannerOutput = parse_llm_json(&call.text)
        .map_err(|e| PipelineError::PlanInvalid(format!("unparseable planner output: {e:#}")))?;

    let subtopics: Vec<Subtopic> = output
        .subtopics
        .into_iter()
        .filter(|p| !p.title.trim().is_empty())
        .take(MAX_SUBTOPICS)
        .enumerate()
        .map(|(i, p)| {
            let mut subtopic = Subtopic::new(i, p.title.trim());
            subtopic.description = p.description;
            subtopic.search_queries = p.search_queries;
            subtopic
        })
        .collect();

    if subtopics.is_empty() {
        return Err(PipelineError::PlanInvalid(
            "planner returned zero usable subtopics".to_string(),
        ));
    }

    tracing::info!(count = subtopics.len(), "plan_complete");

    Ok(StateUpdate {
        subtopics: Some(subtopics),
        current_subtopic_index: Some(0),
        ..Default::default()
    })
}
