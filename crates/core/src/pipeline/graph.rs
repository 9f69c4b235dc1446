//! The research state graph: nodes and conditional routing.
//!
//! The graph is cyclic (`summarize -> search` for per-subtopic
//! iteration) but is executed as a loop with an explicit next-node
//! variable, never recursion.

use crate::state::ResearchState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A node in the research graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Start,
    Plan,
    Search,
    Scrape,
    Summarize,
    Synthesize,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Plan => "plan",
            Self::Search => "search",
            Self::Scrape => "scrape",
            Self::Summarize => "summarize",
            Self::Synthesize => "synthesize",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Node {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "plan" => Ok(Self::Plan),
            "search" => Ok(Self::Search),
            "scrape" => Ok(Self::Scrape),
            "summarize" => Ok(Self::Summarize),
            "synthesize" => Ok(Self::Synthesize),
            "end" => Ok(Self::End),
            other => Err(format!("unknown node: {other}")),
        }
    }
}

/// Choose the edge out of `current` given the observed state.
///
/// `fraction_used` comes from the budget tracker and `shutdown` from
/// the shutdown coordinator; both force convergence on synthesize so a
/// report is always attempted.
pub fn route(current: Node, state: &ResearchState, fraction_used: f64, shutdown: bool) -> Node {
    match current {
        Node::Start => Node::Plan,
        Node::Plan => {
            if state.subtopics.is_empty() || fraction_used >= 1.0 {
                Node::Synthesize
            } else {
                Node::Search
            }
        }
        Node::Search => Node::Scrape,
        Node::Scrape => Node::Summarize,
        Node::Summarize => {
            let more_work = !state.subtopics_exhausted();
            let within_budget = fraction_used < 1.0;
            let tier_allows = !state.degradation_tier.skips_remaining_work();
            if more_work && within_budget && tier_allows && !shutdown {
                Node::Search
            } else {
                Node::Synthesize
            }
        }
        Node::Synthesize | Node::End => Node::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::degrade::DegradationTier;
    use crate::state::Subtopic;

    fn state_with(subtopics: usize, index: usize) -> ResearchState {
        let mut state = ResearchState::new("run-g", "q");
        state.subtopics = (0..subtopics).map(|i| Subtopic::new(i, format!("s{i}"))).collect();
        state.current_subtopic_index = index;
        state
    }

    #[test]
    fn test_happy_path_edges() {
        let state = state_with(3, 0);
        assert_eq!(route(Node::Start, &state, 0.0, false), Node::Plan);
        assert_eq!(route(Node::Plan, &state, 0.0, false), Node::Search);
        assert_eq!(route(Node::Search, &state, 0.0, false), Node::Scrape);
        assert_eq!(route(Node::Scrape, &state, 0.0, false), Node::Summarize);
        assert_eq!(route(Node::Summarize, &state, 0.0, false), Node::Search);

        let done = state_with(3, 3);
        assert_eq!(route(Node::Summarize, &done, 0.0, false), Node::Synthesize);
        assert_eq!(route(Node::Synthesize, &done, 0.0, false), Node::End);
    }

    #[test]
    fn test_empty_plan_short_circuits_to_synthesize() {
        let state = state_with(0, 0);
        assert_eq!(route(Node::Plan, &state, 0.0, false), Node::Synthesize);
    }

    #[test]
    fn test_budget_exhaustion_forces_synthesize() {
        let state = state_with(3, 1);
        assert_eq!(route(Node::Plan, &state, 1.0, false), Node::Synthesize);
        assert_eq!(route(Node::Summarize, &state, 1.0, false), Node::Synthesize);
    }

    #[test]
    fn test_shutdown_forces_synthesize_after_summarize() {
        let state = state_with(3, 1);
        assert_eq!(route(Node::Summarize, &state, 0.0, true), Node::Synthesize);
    }

    #[test]
    fn test_partial_tier_skips_remaining_subtopics() {
        let mut state = state_with(3, 1);
        state.degradation_tier = DegradationTier::Partial;
        assert_eq!(route(Node::Summarize, &state, 0.5, false), Node::Synthesize);
    }

    #[test]
    fn test_node_round_trips_through_strings() {
        for node in [
            Node::Start,
            Node::Plan,
            Node::Search,
            Node::Scrape,
            Node::Summarize,
            Node::Synthesize,
            Node::End,
        ] {
            assert_eq!(node.as_str().parse::<Node>().unwrap(), node);
        }
    }
}
