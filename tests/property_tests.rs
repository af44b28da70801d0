//! Property-based tests for ranking, routing and text primitives.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Normalized scores always land in `[0, 1]`
//! - Aggregation is deterministic and never exceeds the fragment cap
//! - Realtime plans never contain gated tiers
//! - Token overlap measures stay within bounds
//! - The escalation state machine only ever reaches `DONE` once

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use groundline::config::{RankingPolicy, RoutingPolicy};
use groundline::models::{EvidenceFragment, RetrievalMode, RetrievalRequest, SourceRef, Tier};
use groundline::services::{
    ClampNormalizer, EscalationController, EscalationState, EvidenceAggregator, LogisticNormalizer,
    MaxScaleNormalizer, NormalizerRegistry, ScoreNormalizer, TierOutcome, TierRouter,
};
use groundline::{EngineConfig, text};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn fragment(tier: Tier, i: usize, body: &str, score: f32) -> EvidenceFragment {
    let source = match tier {
        Tier::SessionMemory => SourceRef::Transcript {
            session_id: "s1".into(),
            start_ms: i as u64 * 1000,
            end_ms: i as u64 * 1000 + 500,
            speaker: None,
        },
        Tier::Documents => SourceRef::Document {
            document_id: format!("doc-{}", i % 3),
            title: "Notes".to_string(),
            chunk_index: i,
            page: None,
        },
        Tier::WebSearch | Tier::DeepResearch => SourceRef::Url {
            url: format!("https://example.org/{i}"),
            title: None,
        },
    };
    EvidenceFragment::new(
        format!("t{}:{i}", tier.number()),
        tier,
        source,
        body,
        score,
        i as u64 * 1000,
    )
}

fn outcomes_strategy() -> impl Strategy<Value = Vec<TierOutcome>> {
    prop::collection::vec(
        (
            prop::sample::select(Tier::ALL.to_vec()),
            prop::collection::vec(("[a-z]{3,8}( [a-z]{3,8}){0,6}", -2.0f32..3.0), 0..12),
        ),
        0..4,
    )
    .prop_map(|tiers| {
        tiers
            .into_iter()
            .map(|(tier, bodies)| TierOutcome {
                tier,
                fragments: bodies
                    .iter()
                    .enumerate()
                    .map(|(i, (body, score))| Arc::new(fragment(tier, i, body, *score)))
                    .collect(),
                latency: Duration::from_millis(1),
                failure: None,
            })
            .collect()
    })
}

proptest! {
    /// Property: every built-in normalizer maps finite scores into `[0, 1]`.
    #[test]
    fn prop_normalizers_stay_in_unit_range(raw in prop::collection::vec(-100.0f32..100.0, 0..50)) {
        let normalizers: [&dyn ScoreNormalizer; 3] = [
            &ClampNormalizer,
            &MaxScaleNormalizer,
            &LogisticNormalizer::new(0.5, 8.0),
        ];
        for normalizer in normalizers {
            let out = normalizer.normalize(&raw);
            prop_assert_eq!(out.len(), raw.len());
            for score in out {
                prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
            }
        }
    }

    /// Property: clamping preserves order.
    #[test]
    fn prop_clamp_is_monotone(a in -5.0f32..5.0, b in -5.0f32..5.0) {
        let out = ClampNormalizer.normalize(&[a, b]);
        if a <= b {
            prop_assert!(out[0] <= out[1]);
        }
    }

    /// Property: aggregation is deterministic for the same input.
    #[test]
    fn prop_aggregation_is_deterministic(outcomes in outcomes_strategy()) {
        let aggregator =
            EvidenceAggregator::new(RankingPolicy::default(), NormalizerRegistry::default(), 8);
        let first = aggregator.aggregate(&outcomes, 10_000);
        let second = aggregator.aggregate(&outcomes, 10_000);
        let ids = |r: &groundline::services::AggregatedEvidence| {
            r.ranked.iter().map(|f| f.fragment.id.clone()).collect::<Vec<_>>()
        };
        prop_assert_eq!(ids(&first), ids(&second));
        prop_assert_eq!(first.duplicates_removed, second.duplicates_removed);
    }

    /// Property: ranking is sorted, capped and within range.
    #[test]
    fn prop_aggregation_is_sorted_and_capped(outcomes in outcomes_strategy(), cap in 1usize..10) {
        let aggregator =
            EvidenceAggregator::new(RankingPolicy::default(), NormalizerRegistry::default(), cap);
        let result = aggregator.aggregate(&outcomes, 10_000);
        prop_assert!(result.len() <= cap);
        prop_assert!((0.0..=1.0).contains(&result.best_score));
        for pair in result.ranked.windows(2) {
            prop_assert!(pair[0].rank_score >= pair[1].rank_score);
        }
        for ranked in &result.ranked {
            prop_assert!((0.0..=1.0).contains(&ranked.normalized_score));
        }
    }

    /// Property: realtime plans never include gated tiers.
    #[test]
    fn prop_realtime_plan_excludes_gated_tiers(
        total_ms in 0u64..20_000,
        web in any::<bool>(),
        deep in any::<bool>(),
    ) {
        let router = TierRouter::new(RoutingPolicy::default(), Tier::ALL);
        let request = RetrievalRequest::new(&EngineConfig::default(), "s1", "q", RetrievalMode::Realtime)
            .with_max_latency_ms(total_ms)
            .with_web(web)
            .with_deep_research(deep);
        let plan = router.plan(&request);
        prop_assert!(plan.tiers().iter().all(|t| !t.is_gated()));
    }

    /// Property: batch budgets never exceed the request budget.
    #[test]
    fn prop_batch_budgets_fit_the_request(total_ms in 0u64..600_000, web in any::<bool>()) {
        let router = TierRouter::new(RoutingPolicy::default(), Tier::ALL);
        let request = RetrievalRequest::new(&EngineConfig::default(), "s1", "q", RetrievalMode::Batch)
            .with_max_latency_ms(total_ms)
            .with_web(web);
        let plan = router.plan(&request);
        let total: Duration = plan.budgets().iter().map(|b| b.budget).sum();
        prop_assert!(total <= Duration::from_millis(total_ms));
        if !web {
            prop_assert!(!plan.tiers().contains(&Tier::WebSearch));
        }
    }

    /// Property: Jaccard and containment stay in `[0, 1]`.
    #[test]
    fn prop_overlap_measures_bounded(a in "[a-z ]{0,80}", b in "[a-z ]{0,80}") {
        let (a, b) = (text::token_set(&a), text::token_set(&b));
        let j = text::jaccard(&a, &b);
        let c = text::containment(&a, &b);
        prop_assert!((0.0..=1.0).contains(&j));
        prop_assert!((0.0..=1.0).contains(&c));
        prop_assert!((j - text::jaccard(&b, &a)).abs() < f32::EPSILON);
    }

    /// Property: a sentence is fully contained in itself.
    #[test]
    fn prop_self_containment_is_total(s in "[a-z]{4,10}( [a-z]{4,10}){0,8}") {
        let tokens = text::token_set(&s);
        if !tokens.is_empty() {
            prop_assert!((text::containment(&tokens, &tokens) - 1.0).abs() < f32::EPSILON);
        }
    }

    /// Property: normalization is idempotent.
    #[test]
    fn prop_normalize_idempotent(s in "[a-zA-Z0-9 \\t\\n]{0,200}") {
        let once = text::normalize(&s);
        prop_assert_eq!(text::normalize(&once), once);
    }

    /// Property: random walks through the state machine reach DONE at most once.
    #[test]
    fn prop_escalation_done_is_terminal(steps in prop::collection::vec(0usize..10, 0..30)) {
        let states = [
            EscalationState::Init,
            EscalationState::Tier01Queried,
            EscalationState::CoverageCheck,
            EscalationState::Sufficient,
            EscalationState::EscalateProposed,
            EscalationState::AwaitingApproval,
            EscalationState::ApprovedEscalating,
            EscalationState::Rejected,
            EscalationState::Answering,
            EscalationState::Done,
        ];
        let mut controller = EscalationController::new("r1".into());
        for step in steps {
            let next = states[step];
            let legal = controller.state().can_transition_to(next);
            prop_assert_eq!(controller.transition(next).is_ok(), legal);
        }
        let done = controller
            .history()
            .iter()
            .filter(|s| **s == EscalationState::Done)
            .count();
        prop_assert!(done <= 1);
    }
}
