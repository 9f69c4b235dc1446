//! Content extraction stage.

use crate::error::PipelineError;
use crate::pipeline::context::RunContext;
use crate::state::{ResearchState, SearchResult, StateUpdate};

/// Scrape the current subtopic's search results. Individual URL
/// failures are recorded in `errors`; the stage itself never fails.
pub async fn run(
    ctx: &RunContext,
    state: &ResearchState,
    _parent_id: &str,
) -> Result<StateUpdate, PipelineError> {
    let Some(subtopic) = state.current_subtopic() else {
        return Ok(StateUpdate::default());
    };
    let tier = ctx.current_tier();

    if !tier.allows_gathering() {
        tracing::info!(tier = tier.as_str(), "scrape_skipped_by_tier");
        return Ok(StateUpdate::default());
    }
    if ctx.shutdown.should_stop() {
        return Ok(StateUpdate::default());
    }

    let targets: Vec<SearchResult> = state
        .search_results
        .iter()
        .filter(|r| r.subtopic_id == subtopic.id)
        .cloned()
        .collect();

    if targets.is_empty() {
        tracing::info!(subtopic_id = %subtopic.id, "scrape_no_targets");
        return Ok(StateUpdate::default());
    }

    tracing::info!(subtopic_id = %subtopic.id, urls = targets.len(), "scrape_start");
    let outcome = ctx.scraper.scrape(targets).await;

    Ok(StateUpdate {
        scraped_pages: outcome.pages,
        errors: outcome.errors,
        ..Default::default()
    })
}
