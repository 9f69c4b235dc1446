//! One-shot report synthesis stage.
//!
//! Builds the global source index first, hands the model the numbered
//! list so it can cite `[n]` inline, then assembles and validates the
//! final Markdown. Fatal on a fully exhausted model chain; everything
//! downstream of a *parseable-but-odd* response degrades to a
//! deterministic assembly from the summaries themselves.

use super::{output_schema, parse_llm_json};
use crate::error::PipelineError;
use crate::llm::{Intent, PromptSpec};
use crate::pipeline::context::RunContext;
use crate::report::{self, ReportSection, SourceIndex, SynthesisDraft};
use crate::state::{ErrorEntry, ResearchState, StateUpdate};
use schemars::JsonSchema;
use serde::Deserialize;

const SYSTEM_PROMPT: &str = "\
You are a research report writer. Synthesize the per-subtopic research \
summaries into one coherent report: a title, an executive summary, one \
body section per subtopic, and overall conclusions. Cite sources \
inline as [n] using ONLY the numbered source list provided. Do not \
invent sources.";

#[derive(Debug, Deserialize, JsonSchema)]
struct SynthesisSection {
    subtopic_id: String,
    body: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SynthesisOutput {
    title: String,
    executive_summary: String,
    #[serde(default)]
    sections: Vec<SynthesisSection>,
    #[serde(default)]
    conclusions: String,
}

fn heading_for(state: &ResearchState, subtopic_id: &str) -> String {
    state
        .subtopics
        .iter()
        .find(|s| s.id == subtopic_id)
        .map(|s| s.title.clone())
        .unwrap_or_else(|| subtopic_id.to_string())
}

/// Deterministic draft used when there is nothing to synthesize from,
/// or when the model's output could not be parsed.
fn fallback_draft(state: &ResearchState, index: &SourceIndex) -> SynthesisDraft {
    let sections = state
        .subtopic_summaries
        .iter()
        .map(|summary| {
            let citations: Vec<String> = summary
                .citations
                .iter()
                .filter_map(|url| index.number_for(url))
                .map(|n| format!("[{n}]"))
                .collect();
            let body = if citations.is_empty() {
                summary.summary.clone()
            } else {
                format!("{} {}", summary.summary, citations.join(""))
            };
            ReportSection {
                heading: summary.title.clone(),
                body,
            }
        })
        .collect();

    SynthesisDraft {
        title: format!("Research Report: {}", state.query),
        executive_summary: if state.subtopic_summaries.is_empty() {
            "No research findings could be gathered for this query before the run ended."
                .to_string()
        } else {
            format!(
                "Findings across {} researched subtopic(s) are summarized below.",
                state.subtopic_summaries.len()
            )
        },
        sections,
        conclusions: "See the per-subtopic findings above.".to_string(),
    }
}

fn synthesis_context(state: &ResearchState, index: &SourceIndex) -> String {
    let summaries = state
        .subtopic_summaries
        .iter()
        .map(|s| {
            let numbers: Vec<String> = s
                .citations
                .iter()
                .filter_map(|url| index.number_for(url))
                .map(|n| format!("[{n}]"))
                .collect();
            format!(
                "### {} (id: {})\n{}\nSources for this subtopic: {}",
                s.title,
                s.subtopic_id,
                s.summary,
                if numbers.is_empty() {
                    "none".to_string()
                } else {
                    numbers.join(", ")
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!(
        "Original query: {}\n\nNumbered source list:\n{}\n\nSubtopic summaries:\n\n{}",
        state.query,
        index.as_prompt_block(),
        summaries
    )
}

pub async fn run(
    ctx: &RunContext,
    state: &ResearchState,
    parent_id: &str,
) -> Result<StateUpdate, PipelineError> {
    let index = SourceIndex::from_summaries(&state.subtopic_summaries);
    let mut update = StateUpdate::default();

    let draft = if state.subtopic_summaries.is_empty() {
        // Nothing to write from; skip the model call entirely.
        fallback_draft(state, &index)
    } else {
        let user = format!(
            "{}\n\nKeep the report under {} words.",
            synthesis_context(state, &index),
            ctx.settings.report.max_words
        );
        let spec =
            PromptSpec::new(SYSTEM_PROMPT, user).with_schema(output_schema::<SynthesisOutput>());

        // Synthesis is the last stand: chain exhaustion here is fatal.
        let call = ctx
            .router
            .call(spec, Intent::Synthesize, ctx.current_tier(), "synthesize", parent_id)
            .await?;

        match parse_llm_json::<SynthesisOutput>(&call.text) {
            Ok(output) => SynthesisDraft {
                title: output.title,
                executive_summary: output.executive_summary,
                sections: output
                    .sections
                    .into_iter()
                    .map(|s| ReportSection {
                        heading: heading_for(state, &s.subtopic_id),
                        body: s.body,
                    })
                    .collect(),
                conclusions: output.conclusions,
            },
            Err(err) => {
                tracing::warn!(error = %err, "synthesis_unparseable_using_fallback");
                update.errors.push(ErrorEntry::recoverable(
                    "synthesize",
                    format!("unparseable synthesis output, used fallback assembly: {err:#}"),
                ));
                fallback_draft(state, &index)
            }
        }
    };

    let (final_report, metadata, audit) = report::assemble(state, &draft, &index);

    for number in &audit.dangling {
        update.errors.push(ErrorEntry::recoverable(
            "synthesize",
            format!("citation [{number}] has no entry in the source index"),
        ));
    }
    if !audit.unreferenced.is_empty() {
        tracing::info!(unreferenced = ?audit.unreferenced, "sources_never_cited");
    }

    match report::write_report(
        &final_report,
        &state.query,
        &ctx.settings.report.output_dir,
        &metadata,
    ) {
        Ok(path) => tracing::info!(path = %path.display(), "final_report_written"),
        Err(err) => {
            tracing::error!(error = %err, "final_report_write_failed");
            update.errors.push(ErrorEntry::recoverable(
                "synthesize",
                format!("report file write failed: {err:#}"),
            ));
        }
    }

    update.final_report = Some(final_report);
    update.report_metadata = Some(metadata);
    Ok(update)
}
