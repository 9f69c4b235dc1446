//! # Graph Executor
//!
//! Drives the research graph as an explicit loop: invoke the stage
//! under a timeout, merge its update through the reducers, tick the
//! budget and degradation controller, persist an event and a
//! checkpoint, then pick the next edge. Resume loads the newest valid
//! checkpoint and re-runs the routing function over it.

use super::context::RunContext;
use super::graph::{route, Node};
use super::stages;
use crate::degrade::DegradationController;
use crate::error::PipelineError;
use crate::event::{generate_step_id, Event, EventKind};
use crate::state::{ErrorEntry, ResearchState, StateUpdate, SubtopicStatus};
use serde_json::json;
use std::time::Duration;

pub struct Executor {
    ctx: RunContext,
}

impl Executor {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Start a fresh run for `query`.
    pub async fn run_fresh(&self, query: &str) -> Result<ResearchState, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::ConfigInvalid(
                "research query must not be empty".to_string(),
            ));
        }

        let state = ResearchState::new(self.ctx.layout.run_id(), query.trim());
        tracing::info!(run_id = %state.run_id, query = %state.query, "run_started");
        self.drive(state, 0, Node::Plan).await
    }

    /// Resume from the newest valid checkpoint in the run directory.
    /// Total checkpoint loss restarts from scratch when a query is
    /// available, otherwise it is a configuration error.
    pub async fn resume(&self, fallback_query: Option<&str>) -> Result<ResearchState, PipelineError> {
        match self.ctx.checkpoints.recover()? {
            Some((step, state)) => {
                self.ctx
                    .budget
                    .restore_totals(state.total_cost, state.total_tokens);
                *self.ctx.degrade.lock().expect("degrade lock poisoned") =
                    DegradationController::new(state.degradation_tier);

                let last: Node = state.last_node.parse().unwrap_or(Node::Start);
                let next = route(last, &state, self.ctx.budget.fraction_used(), false);

                let _ = self
                    .ctx
                    .progress
                    .append_status(&format!("Run resumed from checkpoint {step}."));
                tracing::info!(
                    run_id = %state.run_id,
                    checkpoint = step,
                    resume_node = %next,
                    "run_resumed"
                );
                self.drive(state, step, next).await
            }
            None => {
                let query = fallback_query.ok_or_else(|| {
                    PipelineError::ConfigInvalid(
                        "no usable checkpoint to resume from and no query given".to_string(),
                    )
                })?;
                tracing::warn!("no usable checkpoint found; restarting run from scratch");
                self.run_fresh(query).await
            }
        }
    }

    /// Status marker applied before a stage runs, so checkpoints show
    /// which phase the current subtopic was in.
    fn in_progress_marker(node: Node, state: &ResearchState) -> Option<StateUpdate> {
        let subtopic = state.current_subtopic()?;
        if matches!(subtopic.status, SubtopicStatus::Done | SubtopicStatus::Failed) {
            return None;
        }
        let status = match node {
            Node::Search => SubtopicStatus::Searching,
            Node::Scrape => SubtopicStatus::Scraping,
            Node::Summarize => SubtopicStatus::Summarizing,
            _ => return None,
        };
        Some(StateUpdate {
            subtopic_status: Some((subtopic.id.clone(), status)),
            ..Default::default()
        })
    }

    async fn dispatch(
        &self,
        node: Node,
        state: &ResearchState,
        step_id: &str,
    ) -> Result<StateUpdate, PipelineError> {
        match node {
            Node::Plan => stages::plan::run(&self.ctx, state, step_id).await,
            Node::Search => stages::search::run(&self.ctx, state, step_id).await,
            Node::Scrape => stages::scrape::run(&self.ctx, state, step_id).await,
            Node::Summarize => stages::summarize::run(&self.ctx, state, step_id).await,
            Node::Synthesize => stages::synthesize::run(&self.ctx, state, step_id).await,
            Node::Start | Node::End => Ok(StateUpdate::default()),
        }
    }

    async fn drive(
        &self,
        mut state: ResearchState,
        start_step: u64,
        start_node: Node,
    ) -> Result<ResearchState, PipelineError> {
        let stage_timeout = Duration::from_secs(self.ctx.settings.executor.stage_timeout_s);
        let mut node = start_node;
        let mut step = start_step;
        let mut parent_id = String::new();

        while node != Node::End {
            if self.ctx.shutdown.is_abort() {
                tracing::warn!("aborting immediately; last checkpoint remains valid");
                return Err(PipelineError::Cancelled);
            }
            // Cooperative drain: fold remaining gathering work into a
            // final synthesis pass.
            if self.ctx.shutdown.should_stop()
                && matches!(node, Node::Search | Node::Scrape | Node::Summarize)
            {
                tracing::info!(skipped = %node, "drain_requested_routing_to_synthesize");
                node = Node::Synthesize;
            }

            if let Some(marker) = Self::in_progress_marker(node, &state) {
                state.apply(marker);
            }

            let step_id = generate_step_id(node.as_str());
            let _ = self.ctx.events.append(
                &Event::new(EventKind::NodeEnter, node.as_str())
                    .with_step(&step_id)
                    .with_parent(&parent_id)
                    .with_payload(json!({ "subtopic_index": state.current_subtopic_index })),
            );

            let outcome = match tokio::time::timeout(
                stage_timeout,
                self.dispatch(node, &state, &step_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout {
                    node: node.as_str().to_string(),
                    seconds: stage_timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(update) => {
                    state.apply(update);
                    let _ = self.ctx.events.append(
                        &Event::new(EventKind::NodeExit, node.as_str())
                            .with_step(&step_id)
                            .with_parent(&parent_id),
                    );
                }
                Err(err) => {
                    let _ = self.ctx.events.append(
                        &Event::new(EventKind::Error, node.as_str())
                            .with_step(&step_id)
                            .with_parent(&parent_id)
                            .with_payload(json!({ "message": err.to_string() })),
                    );

                    match node {
                        // Without a plan or a synthesized report the
                        // run has nothing to offer; fail it.
                        Node::Plan | Node::Synthesize => {
                            let _ = self
                                .ctx
                                .progress
                                .append_error_note(node.as_str(), &err.to_string());
                            return Err(err);
                        }
                        // A wedged subtopic is skipped, not fatal.
                        Node::Summarize => {
                            let failed_id =
                                state.current_subtopic().map(|s| s.id.clone());
                            state.apply(StateUpdate {
                                current_subtopic_index: Some(state.current_subtopic_index + 1),
                                errors: vec![ErrorEntry::recoverable(
                                    node.as_str(),
                                    err.to_string(),
                                )],
                                subtopic_status: failed_id
                                    .map(|id| (id, SubtopicStatus::Failed)),
                                ..Default::default()
                            });
                        }
                        _ => {
                            state.apply(StateUpdate {
                                errors: vec![ErrorEntry::recoverable(
                                    node.as_str(),
                                    err.to_string(),
                                )],
                                ..Default::default()
                            });
                        }
                    }
                }
            }

            // Budget tick and degradation evaluation on every edge.
            let status = self.ctx.budget.status();
            let _ = self.ctx.events.append(
                &Event::new(EventKind::BudgetTick, node.as_str())
                    .with_parent(&step_id)
                    .with_payload(serde_json::to_value(&status).unwrap_or(json!(null))),
            );

            let change = self
                .ctx
                .degrade
                .lock()
                .expect("degrade lock poisoned")
                .on_budget_tick(status.fraction_used, status.tier_suggestion);
            if let Some(change) = change {
                tracing::warn!(
                    from = change.from.as_str(),
                    to = change.to.as_str(),
                    reason = %change.reason,
                    "tier_change"
                );
                let _ = self.ctx.events.append(
                    &Event::new(EventKind::TierChange, node.as_str())
                        .with_parent(&step_id)
                        .with_payload(json!({
                            "from": change.from.as_str(),
                            "to": change.to.as_str(),
                            "reason": change.reason,
                        })),
                );
                let _ = self.ctx.progress.append_status(&format!(
                    "Operating tier changed from {} to {}.",
                    change.from.as_str(),
                    change.to.as_str()
                ));
            }

            state.degradation_tier = self.ctx.current_tier();
            state.total_cost = status.total_cost_usd;
            state.total_tokens = status.total_input_tokens + status.total_output_tokens;
            state.last_node = node.as_str().to_string();

            step += 1;
            self.ctx.checkpoints.save(&state, step)?;
            let _ = self.ctx.events.append(
                &Event::new(EventKind::CheckpointWritten, node.as_str())
                    .with_parent(&step_id)
                    .with_payload(json!({ "step": step })),
            );

            parent_id = step_id;
            node = route(node, &state, status.fraction_used, self.ctx.shutdown.should_stop());
        }

        tracing::info!(
            run_id = %state.run_id,
            total_cost = state.total_cost,
            summaries = state.subtopic_summaries.len(),
            "run_complete"
        );
        Ok(state)
    }
}
