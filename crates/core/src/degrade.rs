//! # Degradation Controller
//!
//! Four-tier state machine that trades capability for budget headroom:
//!
//! ```text
//! FULL --(fraction >= 0.80)--> REDUCED
//! REDUCED --(fraction >= 0.95 OR 5 consecutive router exhaustions)--> CACHED
//! CACHED --(chain exhausted OR fraction >= 1.0)--> PARTIAL
//! ANY --(fraction < 0.75 AND recent success)--> one step up
//! ```
//!
//! The budget tracker only *suggests* a tier from `fraction_used`; this
//! controller owns the actual transitions and moves one step per tick
//! so every intermediate tier is observable in the event log.

use serde::{Deserialize, Serialize};

/// Coarse-grained operating mode, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DegradationTier {
    #[default]
    Full,
    Reduced,
    Cached,
    Partial,
}

impl DegradationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Reduced => "REDUCED",
            Self::Cached => "CACHED",
            Self::Partial => "PARTIAL",
        }
    }

    fn step_down(self) -> Self {
        match self {
            Self::Full => Self::Reduced,
            Self::Reduced => Self::Cached,
            Self::Cached | Self::Partial => Self::Partial,
        }
    }

    fn step_up(self) -> Self {
        match self {
            Self::Full | Self::Reduced => Self::Full,
            Self::Cached => Self::Reduced,
            Self::Partial => Self::Cached,
        }
    }

    /// Number of search-query expansions attempted at this tier.
    pub fn expansion_count(&self) -> usize {
        match self {
            Self::Full => 3,
            Self::Reduced => 2,
            Self::Cached | Self::Partial => 0,
        }
    }

    /// Whether new search/scrape provider calls are allowed.
    pub fn allows_gathering(&self) -> bool {
        matches!(self, Self::Full | Self::Reduced)
    }

    /// Whether remaining subtopics are skipped entirely.
    pub fn skips_remaining_work(&self) -> bool {
        matches!(self, Self::Partial)
    }
}

/// A single tier transition, emitted as a `tier_change` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierChange {
    pub from: DegradationTier,
    pub to: DegradationTier,
    pub reason: String,
}

/// Number of consecutive router exhaustions that forces REDUCED -> CACHED.
const EXHAUSTION_LIMIT: u32 = 5;
/// Budget fraction below which recovery upgrades become possible.
const RECOVERY_FRACTION: f64 = 0.75;

/// Owns the active tier for one run.
#[derive(Debug)]
pub struct DegradationController {
    tier: DegradationTier,
    consecutive_exhaustions: u32,
    recent_success: bool,
}

impl DegradationController {
    pub fn new(initial: DegradationTier) -> Self {
        Self {
            tier: initial,
            consecutive_exhaustions: 0,
            recent_success: false,
        }
    }

    pub fn tier(&self) -> DegradationTier {
        self.tier
    }

    /// Evaluate the budget tracker's suggestion. Moves at most one step
    /// per call: down toward the suggestion, or up under the recovery
    /// rule. Returns the transition if one occurred.
    pub fn on_budget_tick(
        &mut self,
        fraction_used: f64,
        suggestion: DegradationTier,
    ) -> Option<TierChange> {
        if suggestion > self.tier {
            let from = self.tier;
            self.tier = self.tier.step_down();
            return Some(TierChange {
                from,
                to: self.tier,
                reason: format!("budget fraction {:.2} suggests {}", fraction_used, suggestion.as_str()),
            });
        }

        if fraction_used < RECOVERY_FRACTION && self.recent_success && self.tier > DegradationTier::Full
        {
            let from = self.tier;
            self.tier = self.tier.step_up();
            self.recent_success = false;
            return Some(TierChange {
                from,
                to: self.tier,
                reason: format!("recovered: fraction {:.2} with recent success", fraction_used),
            });
        }

        None
    }

    /// Record a successful provider call.
    pub fn on_call_success(&mut self) {
        self.consecutive_exhaustions = 0;
        self.recent_success = true;
    }

    /// Record a full fallback-chain exhaustion. At CACHED this means
    /// every provider is failing and the run drops to PARTIAL; at
    /// REDUCED five in a row force CACHED.
    pub fn on_chain_exhausted(&mut self) -> Option<TierChange> {
        self.consecutive_exhaustions += 1;
        self.recent_success = false;

        match self.tier {
            DegradationTier::Cached => {
                let from = self.tier;
                self.tier = DegradationTier::Partial;
                Some(TierChange {
                    from,
                    to: self.tier,
                    reason: "all providers failing while cached".to_string(),
                })
            }
            DegradationTier::Reduced if self.consecutive_exhaustions >= EXHAUSTION_LIMIT => {
                let from = self.tier;
                self.tier = DegradationTier::Cached;
                self.consecutive_exhaustions = 0;
                Some(TierChange {
                    from,
                    to: self.tier,
                    reason: format!("{EXHAUSTION_LIMIT} consecutive router exhaustions"),
                })
            }
            _ => None,
        }
    }
}
