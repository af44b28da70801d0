//! Tier routing and latency budgets.
//!
//! The router decides which tiers a request starts with and how much of the
//! latency budget each one gets.
//!
//! | Mode | Planned tiers | Budget |
//! |------|---------------|--------|
//! | Realtime | T0, T1 | `realtime_tier0_share` / `realtime_tier1_share` of `max_latency_ms` |
//! | Batch | T0, T1, plus T2/T3 when the request allows them | even split |
//!
//! Gated tiers in a batch plan have their budget reserved up front; they are
//! still queried only after approval. In realtime mode a gated tier authorized
//! later gets `realtime_escalation_share` of the total.
//!
//! Every planned tier needs at least `min_tier_budget_ms`. When the budget is
//! too small, the highest-numbered tier is dropped first until the rest fit.

use crate::config::RoutingPolicy;
use crate::models::{RetrievalMode, RetrievalRequest, Tier};
use std::collections::BTreeSet;
use std::time::Duration;

/// Time budget for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBudget {
    /// The tier.
    pub tier: Tier,
    /// Maximum wall time for its query.
    pub budget: Duration,
}

/// Ordered tiers and budgets for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPlan {
    budgets: Vec<TierBudget>,
}

impl TierPlan {
    /// All planned tiers in ascending order.
    #[must_use]
    pub fn budgets(&self) -> &[TierBudget] {
        &self.budgets
    }

    /// Planned tiers that may be queried without approval.
    #[must_use]
    pub fn initial_wave(&self) -> Vec<TierBudget> {
        self.budgets
            .iter()
            .filter(|b| !b.tier.is_gated())
            .copied()
            .collect()
    }

    /// Budget reserved for a tier, if planned.
    #[must_use]
    pub fn budget_for(&self, tier: Tier) -> Option<Duration> {
        self.budgets
            .iter()
            .find(|b| b.tier == tier)
            .map(|b| b.budget)
    }

    /// Planned tiers.
    #[must_use]
    pub fn tiers(&self) -> Vec<Tier> {
        self.budgets.iter().map(|b| b.tier).collect()
    }

    /// Returns true if nothing can be queried.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }
}

/// Computes tier plans from the routing policy and registered adapters.
#[derive(Debug, Clone)]
pub struct TierRouter {
    policy: RoutingPolicy,
    available: BTreeSet<Tier>,
}

impl TierRouter {
    /// Creates a router for the tiers that have an adapter.
    #[must_use]
    pub fn new(policy: RoutingPolicy, available: impl IntoIterator<Item = Tier>) -> Self {
        Self {
            policy,
            available: available.into_iter().collect(),
        }
    }

    /// Returns true if an adapter is registered for the tier.
    #[must_use]
    pub fn is_available(&self, tier: Tier) -> bool {
        self.available.contains(&tier)
    }

    /// Plans the tiers a request starts with.
    #[must_use]
    pub fn plan(&self, request: &RetrievalRequest) -> TierPlan {
        let mut tiers: Vec<Tier> = match request.mode {
            RetrievalMode::Realtime => vec![Tier::SessionMemory, Tier::Documents],
            RetrievalMode::Batch => {
                let mut tiers = vec![Tier::SessionMemory, Tier::Documents];
                if request.allow_web {
                    tiers.push(Tier::WebSearch);
                }
                if request.allow_deep_research {
                    tiers.push(Tier::DeepResearch);
                }
                tiers
            },
        };
        tiers.retain(|t| self.available.contains(t));

        loop {
            let budgets: Vec<TierBudget> = tiers
                .iter()
                .map(|&tier| TierBudget {
                    tier,
                    budget: self.share(request, tier, tiers.len()),
                })
                .collect();

            let floor = Duration::from_millis(self.policy.min_tier_budget_ms);
            if budgets.iter().all(|b| b.budget >= floor) {
                return TierPlan { budgets };
            }
            // Lower-numbered tiers win when the budget is tight.
            tiers.pop();
        }
    }

    /// Budget for a gated tier authorized by escalation.
    ///
    /// Returns `None` if the tier has no adapter or the budget is below the
    /// floor.
    #[must_use]
    pub fn escalation_budget(
        &self,
        request: &RetrievalRequest,
        plan: &TierPlan,
        tier: Tier,
    ) -> Option<Duration> {
        if !self.available.contains(&tier) {
            return None;
        }
        let budget = plan.budget_for(tier).unwrap_or_else(|| {
            scale(request.max_latency_ms, self.policy.realtime_escalation_share)
        });
        (budget >= Duration::from_millis(self.policy.min_tier_budget_ms)).then_some(budget)
    }

    #[allow(clippy::cast_precision_loss)]
    fn share(&self, request: &RetrievalRequest, tier: Tier, planned: usize) -> Duration {
        match request.mode {
            RetrievalMode::Realtime => {
                let share = match tier {
                    Tier::SessionMemory => self.policy.realtime_tier0_share,
                    Tier::Documents => self.policy.realtime_tier1_share,
                    Tier::WebSearch | Tier::DeepResearch => self.policy.realtime_escalation_share,
                };
                scale(request.max_latency_ms, share)
            },
            RetrievalMode::Batch => {
                Duration::from_millis(request.max_latency_ms / planned.max(1) as u64)
            },
        }
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scale(total_ms: u64, share: f32) -> Duration {
    Duration::from_millis((total_ms as f64 * f64::from(share.clamp(0.0, 1.0))).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn router(tiers: &[Tier]) -> TierRouter {
        TierRouter::new(RoutingPolicy::default(), tiers.iter().copied())
    }

    fn request(mode: RetrievalMode, total_ms: u64) -> RetrievalRequest {
        RetrievalRequest::new(&EngineConfig::default(), "s1", "what was decided?", mode)
            .with_max_latency_ms(total_ms)
    }

    #[test]
    fn test_realtime_plan_favours_session_memory() {
        let plan = router(&Tier::ALL).plan(&request(RetrievalMode::Realtime, 4000).with_web(true));
        assert_eq!(plan.tiers(), vec![Tier::SessionMemory, Tier::Documents]);
        assert_eq!(plan.budget_for(Tier::SessionMemory), Some(Duration::from_millis(2800)));
        assert_eq!(plan.budget_for(Tier::Documents), Some(Duration::from_millis(1200)));
    }

    #[test]
    fn test_batch_plan_splits_evenly_and_includes_allowed_gated_tiers() {
        let req = request(RetrievalMode::Batch, 30_000).with_web(true);
        let plan = router(&Tier::ALL).plan(&req);
        assert_eq!(
            plan.tiers(),
            vec![Tier::SessionMemory, Tier::Documents, Tier::WebSearch]
        );
        assert!(
            plan.budgets()
                .iter()
                .all(|b| b.budget == Duration::from_millis(10_000))
        );
        assert_eq!(plan.initial_wave().len(), 2);
    }

    #[test]
    fn test_unregistered_tiers_are_excluded() {
        let plan = router(&[Tier::Documents]).plan(&request(RetrievalMode::Realtime, 4000));
        assert_eq!(plan.tiers(), vec![Tier::Documents]);

        let plan = router(&[]).plan(&request(RetrievalMode::Realtime, 4000));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_tight_budget_drops_highest_tier_first() {
        // 30% of 100ms is below the 50ms floor.
        let plan = router(&Tier::ALL).plan(&request(RetrievalMode::Realtime, 100));
        assert_eq!(plan.tiers(), vec![Tier::SessionMemory]);

        let req = request(RetrievalMode::Batch, 120)
            .with_web(true)
            .with_deep_research(true);
        let plan = router(&Tier::ALL).plan(&req);
        assert_eq!(plan.tiers(), vec![Tier::SessionMemory, Tier::Documents]);
    }

    #[test]
    fn test_escalation_budget() {
        let r = router(&[Tier::SessionMemory, Tier::Documents, Tier::WebSearch]);
        let req = request(RetrievalMode::Realtime, 4000).with_web(true);
        let plan = r.plan(&req);
        assert_eq!(
            r.escalation_budget(&req, &plan, Tier::WebSearch),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(r.escalation_budget(&req, &plan, Tier::DeepResearch), None);

        let req = request(RetrievalMode::Batch, 30_000).with_web(true);
        let plan = r.plan(&req);
        assert_eq!(
            r.escalation_budget(&req, &plan, Tier::WebSearch),
            Some(Duration::from_millis(10_000))
        );
    }
}
