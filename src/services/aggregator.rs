//! Evidence aggregation and ranking.
//!
//! # Pipeline
//!
//! 1. **Validate**: malformed fragments are dropped and reported, never fatal.
//! 2. **Normalize**: each tier's raw scores go through its registered
//!    [`ScoreNormalizer`](super::ScoreNormalizer).
//! 3. **Deduplicate**: fragments from the same tier and source document whose
//!    normalized text is identical, or whose token Jaccard similarity reaches
//!    `dedup_similarity_threshold`, collapse into the highest-scored instance.
//! 4. **Rank**: `tier_weight * normalized_score * recency_factor`, where
//!    recency only applies to session memory:
//!
//! ```text
//! recency_factor = (1 - influence) + influence * 0.5^(age / half_life)
//! ```
//!
//! 5. **Cap** at `max_fragments`.
//!
//! Ties are broken by tier, then fragment id, so the same input always yields
//! the same ranking.

use super::gateway::TierOutcome;
use super::normalizer::NormalizerRegistry;
use crate::config::RankingPolicy;
use crate::models::{EvidenceFragment, FragmentId, Tier};
use crate::text;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// A fragment that survived aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFragment {
    /// The fragment.
    pub fragment: Arc<EvidenceFragment>,
    /// Score after per-tier normalization, in `[0, 1]`.
    pub normalized_score: f32,
    /// Final ranking score.
    pub rank_score: f32,
}

/// A fragment removed by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFragment {
    /// Offending fragment id (may be blank).
    pub fragment_id: FragmentId,
    /// Tier whose adapter returned it.
    pub tier: Tier,
    /// Why it was dropped.
    pub reason: String,
}

/// Aggregation result for one request.
#[derive(Debug, Clone, Default)]
pub struct AggregatedEvidence {
    /// Ranked fragments, best first.
    pub ranked: Vec<RankedFragment>,
    /// Malformed fragments.
    pub dropped: Vec<DroppedFragment>,
    /// How many fragments were collapsed as duplicates.
    pub duplicates_removed: usize,
    /// Highest normalized score among deduplicated fragments.
    pub best_score: f32,
}

impl AggregatedEvidence {
    /// Number of ranked fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Returns true if nothing survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Looks up a ranked fragment by id.
    #[must_use]
    pub fn get(&self, id: &FragmentId) -> Option<&RankedFragment> {
        self.ranked.iter().find(|r| r.fragment.id == *id)
    }

    /// Tiers that contributed at least one ranked fragment.
    #[must_use]
    pub fn tiers(&self) -> BTreeSet<Tier> {
        self.ranked.iter().map(|r| r.fragment.tier).collect()
    }
}

struct Candidate {
    fragment: Arc<EvidenceFragment>,
    normalized: f32,
    document_key: String,
    hash: String,
    tokens: HashSet<String>,
}

/// Merges tier outcomes into one ranked evidence list.
#[derive(Clone)]
pub struct EvidenceAggregator {
    policy: RankingPolicy,
    normalizers: NormalizerRegistry,
    max_fragments: usize,
}

impl EvidenceAggregator {
    /// Creates an aggregator.
    #[must_use]
    pub fn new(policy: RankingPolicy, normalizers: NormalizerRegistry, max_fragments: usize) -> Self {
        Self {
            policy,
            normalizers,
            max_fragments,
        }
    }

    /// Aggregates every outcome collected so far.
    ///
    /// `now_ms` is the reference instant for recency decay; the engine passes
    /// the request's issue time so repeated runs rank identically.
    #[must_use]
    pub fn aggregate(&self, outcomes: &[TierOutcome], now_ms: u64) -> AggregatedEvidence {
        let mut dropped = Vec::new();
        let mut candidates = Vec::new();

        for outcome in outcomes {
            let mut seen_ids = HashSet::new();
            let mut valid = Vec::with_capacity(outcome.fragments.len());
            for fragment in &outcome.fragments {
                let reason = match fragment.validate(outcome.tier) {
                    Err(crate::Error::AggregationError { reason, .. }) => Some(reason),
                    Err(e) => Some(e.to_string()),
                    Ok(()) if !seen_ids.insert(fragment.id.clone()) => {
                        Some("duplicate fragment id within tier".to_string())
                    },
                    Ok(()) => None,
                };
                match reason {
                    Some(reason) => dropped.push(DroppedFragment {
                        fragment_id: fragment.id.clone(),
                        tier: outcome.tier,
                        reason,
                    }),
                    None => valid.push(fragment),
                }
            }

            let raw: Vec<f32> = valid.iter().map(|f| f.score).collect();
            let normalized = self.normalizers.get(outcome.tier).normalize(&raw);
            for (fragment, score) in valid.into_iter().zip(normalized) {
                candidates.push(Candidate {
                    document_key: fragment.source_ref.document_key(),
                    hash: text::content_hash(&fragment.text),
                    tokens: text::token_set(&fragment.text),
                    fragment: Arc::clone(fragment),
                    normalized: if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 },
                });
            }
        }

        let before = candidates.len();
        let kept = self.deduplicate(candidates);
        let duplicates_removed = before - kept.len();
        let best_score = kept.iter().map(|c| c.normalized).fold(0.0_f32, f32::max);

        let mut ranked: Vec<RankedFragment> = kept
            .into_iter()
            .map(|c| {
                let rank_score = self.policy.tier_weights[c.fragment.tier.index()]
                    * c.normalized
                    * self.recency_factor(&c.fragment, now_ms);
                RankedFragment {
                    fragment: c.fragment,
                    normalized_score: c.normalized,
                    rank_score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.rank_score
                .total_cmp(&a.rank_score)
                .then_with(|| a.fragment.tier.cmp(&b.fragment.tier))
                .then_with(|| a.fragment.id.cmp(&b.fragment.id))
        });
        ranked.truncate(self.max_fragments);

        AggregatedEvidence {
            ranked,
            dropped,
            duplicates_removed,
            best_score,
        }
    }

    fn deduplicate(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        // Highest score first so the survivor of each cluster is the best one.
        candidates.sort_by(|a, b| {
            b.normalized
                .total_cmp(&a.normalized)
                .then_with(|| a.fragment.tier.cmp(&b.fragment.tier))
                .then_with(|| a.fragment.id.cmp(&b.fragment.id))
        });

        let threshold = self.policy.dedup_similarity_threshold;
        let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let duplicate = kept.iter().any(|k| {
                k.fragment.tier == candidate.fragment.tier
                    && k.document_key == candidate.document_key
                    && (k.hash == candidate.hash
                        || text::jaccard(&k.tokens, &candidate.tokens) >= threshold)
            });
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept
    }

    #[allow(clippy::cast_precision_loss)]
    fn recency_factor(&self, fragment: &EvidenceFragment, now_ms: u64) -> f32 {
        if fragment.tier != Tier::SessionMemory || self.policy.recency_half_life_ms == 0 {
            return 1.0;
        }
        let influence = self.policy.recency_influence.clamp(0.0, 1.0);
        let age = now_ms.saturating_sub(fragment.recency_ts) as f64;
        let decay = 0.5_f64.powf(age / self.policy.recency_half_life_ms as f64);
        #[allow(clippy::cast_possible_truncation)]
        let decay = decay as f32;
        (1.0 - influence) + influence * decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionId, SourceRef};
    use std::time::Duration;

    fn outcome(tier: Tier, fragments: Vec<EvidenceFragment>) -> TierOutcome {
        TierOutcome {
            tier,
            fragments: fragments.into_iter().map(Arc::new).collect(),
            latency: Duration::from_millis(5),
            failure: None,
        }
    }

    fn doc(id: &str, doc_id: &str, text: &str, score: f32) -> EvidenceFragment {
        EvidenceFragment::new(
            id,
            Tier::Documents,
            SourceRef::Document {
                document_id: doc_id.to_string(),
                title: "Handbook".to_string(),
                chunk_index: 0,
                page: None,
            },
            text,
            score,
            0,
        )
    }

    fn memory(id: &str, text: &str, score: f32, ts: u64) -> EvidenceFragment {
        EvidenceFragment::new(
            id,
            Tier::SessionMemory,
            SourceRef::Transcript {
                session_id: SessionId::new("s1"),
                start_ms: ts,
                end_ms: ts + 1000,
                speaker: None,
            },
            text,
            score,
            ts,
        )
    }

    fn aggregator(max: usize) -> EvidenceAggregator {
        EvidenceAggregator::new(RankingPolicy::default(), NormalizerRegistry::default(), max)
    }

    #[test]
    fn test_near_duplicates_in_same_document_collapse() {
        let outcomes = vec![outcome(
            Tier::Documents,
            vec![
                doc("a", "d1", "The budget for Q3 is 40k dollars.", 0.6),
                doc("b", "d1", "the budget for Q3 is 40k dollars", 0.8),
                doc("c", "d2", "The budget for Q3 is 40k dollars.", 0.5),
            ],
        )];
        let result = aggregator(8).aggregate(&outcomes, 0);
        assert_eq!(result.duplicates_removed, 1);
        let ids: Vec<&str> = result.ranked.iter().map(|r| r.fragment.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_tier_priority_breaks_equal_scores() {
        let outcomes = vec![
            outcome(Tier::Documents, vec![doc("d", "d1", "launch date is march", 0.9)]),
            outcome(Tier::SessionMemory, vec![memory("m", "launch moved to april", 0.9, 1000)]),
        ];
        let result = aggregator(8).aggregate(&outcomes, 1000);
        assert_eq!(result.ranked[0].fragment.tier, Tier::SessionMemory);
        assert!((result.best_score - 0.9).abs() < 1e-6);
        assert_eq!(
            result.tiers().into_iter().collect::<Vec<_>>(),
            vec![Tier::SessionMemory, Tier::Documents]
        );
    }

    #[test]
    fn test_recency_decays_old_session_memory() {
        let half_life = RankingPolicy::default().recency_half_life_ms;
        let outcomes = vec![outcome(
            Tier::SessionMemory,
            vec![
                memory("old", "we agreed on vendor a", 0.8, 0),
                memory("new", "we switched to vendor b", 0.8, 4 * half_life),
            ],
        )];
        let result = aggregator(8).aggregate(&outcomes, 4 * half_life);
        assert_eq!(result.ranked[0].fragment.id.as_str(), "new");
        assert!(result.ranked[1].rank_score < result.ranked[0].rank_score);
    }

    #[test]
    fn test_malformed_fragments_are_dropped() {
        let mut wrong_tier = doc("x", "d9", "text", 0.5);
        wrong_tier.tier = Tier::WebSearch;
        let outcomes = vec![outcome(
            Tier::Documents,
            vec![
                doc("ok", "d1", "valid passage", 0.5),
                doc("", "d1", "blank id", 0.5),
                doc("nan", "d1", "bad score", f32::NAN),
                doc("ok", "d2", "same id again", 0.4),
                wrong_tier,
            ],
        )];
        let result = aggregator(8).aggregate(&outcomes, 0);
        assert_eq!(result.len(), 1);
        assert_eq!(result.dropped.len(), 4);
    }

    #[test]
    fn test_cap_and_determinism() {
        let fragments: Vec<EvidenceFragment> = (0..20)
            .map(|i| doc(&format!("f{i:02}"), &format!("d{i}"), &format!("distinct passage {i}"), 0.5))
            .collect();
        let outcomes = vec![outcome(Tier::Documents, fragments)];
        let first = aggregator(5).aggregate(&outcomes, 0);
        let second = aggregator(5).aggregate(&outcomes, 0);
        assert_eq!(first.len(), 5);
        assert_eq!(first.ranked, second.ranked);
        assert_eq!(first.ranked[0].fragment.id.as_str(), "f00");
    }

    #[test]
    fn test_ranked_fragments_share_adapter_results() {
        let outcomes = vec![outcome(
            Tier::Documents,
            vec![doc("a", "d1", "vendor shortlist is final", 0.7)],
        )];
        let first = aggregator(8).aggregate(&outcomes, 0);
        let second = aggregator(8).aggregate(&outcomes, 0);
        assert!(Arc::ptr_eq(&outcomes[0].fragments[0], &first.ranked[0].fragment));
        assert!(Arc::ptr_eq(&first.ranked[0].fragment, &second.ranked[0].fragment));
        assert_eq!(Arc::strong_count(&outcomes[0].fragments[0]), 3);
    }
}
