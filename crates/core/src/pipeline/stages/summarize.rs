//! Per-subtopic compression stage.
//!
//! Produces one dense summary per subtopic, appends it to the
//! progressive report, and evicts the consumed raw page content from
//! state (observation masking). Always advances the subtopic index so
//! the run can never wedge on a bad subtopic.

use super::{output_schema, parse_llm_json};
use crate::error::PipelineError;
use crate::llm::{estimate_tokens, Intent, PromptSpec};
use crate::pipeline::context::RunContext;
use crate::state::{
    ErrorEntry, ResearchState, ScrapedPage, StateUpdate, SubtopicStatus, SubtopicSummary,
};
use schemars::JsonSchema;
use serde::Deserialize;

const SYSTEM_PROMPT: &str = "\
You are a research summarizer. Condense the provided source material \
into a dense 200-500 word summary answering the subtopic question, \
plus 3-5 key findings as short bullet points. Preserve concrete facts, \
figures, and disagreements between sources.";

#[derive(Debug, Deserialize, JsonSchema)]
struct SummarizerOutput {
    summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
}

fn content_block(pages: &[&ScrapedPage]) -> String {
    pages
        .iter()
        .map(|p| format!("Source: {} ({})\n\n{}", p.title, p.url, p.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// First-seen-order deduplicated citation list for the consumed pages.
fn citations_for(pages: &[&ScrapedPage]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    pages
        .iter()
        .filter(|p| seen.insert(p.url.clone()))
        .map(|p| p.url.clone())
        .collect()
}

pub async fn run(
    ctx: &RunContext,
    state: &ResearchState,
    parent_id: &str,
) -> Result<StateUpdate, PipelineError> {
    let next_index = state.current_subtopic_index + 1;
    let Some(subtopic) = state.current_subtopic() else {
        return Ok(StateUpdate::default());
    };

    let mut update = StateUpdate {
        current_subtopic_index: Some(next_index),
        ..Default::default()
    };

    let pages: Vec<&ScrapedPage> = state
        .scraped_pages
        .iter()
        .filter(|p| p.subtopic_id == subtopic.id && !p.content.is_empty())
        .collect();

    if pages.is_empty() {
        tracing::warn!(subtopic_id = %subtopic.id, "summarize_no_content");
        update.errors.push(ErrorEntry::for_subtopic(
            "summarize",
            &subtopic.id,
            "no scraped content available",
        ));
        update.subtopic_status = Some((subtopic.id.clone(), SubtopicStatus::Failed));
        return Ok(update);
    }

    let user = format!(
        "Subtopic: {}\n\nSources ({}):\n\n{}",
        subtopic.title,
        pages.len(),
        content_block(&pages)
    );
    let spec =
        PromptSpec::new(SYSTEM_PROMPT, user).with_schema(output_schema::<SummarizerOutput>());

    let outcome = ctx
        .router
        .call(spec, Intent::Summarize, ctx.current_tier(), "summarize", parent_id)
        .await;

    match outcome {
        Ok(call) => match parse_llm_json::<SummarizerOutput>(&call.text) {
            Ok(output) => {
                let citations = citations_for(&pages);
                let token_count = estimate_tokens(&output.summary);

                if let Err(err) = ctx.progress.append_subtopic(
                    &subtopic.title,
                    &output.summary,
                    &output.key_findings,
                    &citations,
                ) {
                    tracing::warn!(error = %err, "progress_append_failed");
                }

                tracing::info!(
                    subtopic_id = %subtopic.id,
                    sources = citations.len(),
                    words = output.summary.split_whitespace().count(),
                    "summarize_complete"
                );

                update.subtopic_summaries.push(SubtopicSummary {
                    subtopic_id: subtopic.id.clone(),
                    title: subtopic.title.clone(),
                    summary: output.summary,
                    citations,
                    key_findings: output.key_findings,
                    token_count,
                });
                update.subtopic_status = Some((subtopic.id.clone(), SubtopicStatus::Done));
                // The summary now carries this subtopic's knowledge;
                // drop the raw page bodies to bound checkpoint size.
                update.evict_content_for = Some(subtopic.id.clone());
            }
            Err(err) => {
                tracing::error!(subtopic_id = %subtopic.id, error = %err, "summarize_unparseable");
                update.errors.push(ErrorEntry::for_subtopic(
                    "summarize",
                    &subtopic.id,
                    format!("unparseable summarizer output: {err:#}"),
                ));
                update.subtopic_status = Some((subtopic.id.clone(), SubtopicStatus::Failed));
            }
        },
        // A dead model chain loses this subtopic, not the run.
        Err(PipelineError::ModelCallExhausted { detail, .. }) => {
            tracing::error!(subtopic_id = %subtopic.id, detail = %detail, "summarize_exhausted");
            let _ = ctx
                .progress
                .append_error_note("summarize", &format!("subtopic {} lost: {detail}", subtopic.id));
            update.errors.push(ErrorEntry::for_subtopic(
                "summarize",
                &subtopic.id,
                format!("model chain exhausted: {detail}"),
            ));
            update.subtopic_status = Some((subtopic.id.clone(), SubtopicStatus::Failed));
        }
        Err(other) => return Err(other),
    }

    Ok(update)
}
