//! Grounded answer assembly.
//!
//! Takes a generator's draft and keeps only what the evidence supports:
//!
//! - citations to fragments outside this request's evidence are discarded
//! - a claim is supported by a fragment when the share of its content tokens
//!   found in the fragment reaches `critical_claim_relevance_floor`
//! - an unsupported proposed citation is replaced by the best supporting
//!   fragment, if there is one
//! - unsupported critical claims are withheld and listed in
//!   `unsupported_claims`; unsupported non-critical claims stay uncited
//!
//! An answer that ends up with no citation at all is a refusal.

use super::aggregator::AggregatedEvidence;
use super::claims::ClaimClassifier;
use crate::llm::DraftAnswer;
use crate::models::{CitedSource, FragmentId, GroundedAnswer, RefusalReason, RequestId, Tier};
use crate::text;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Builds grounded answers from drafts.
pub struct AnswerAssembler {
    classifier: Arc<dyn ClaimClassifier>,
    relevance_floor: f32,
}

impl AnswerAssembler {
    /// Creates an assembler.
    #[must_use]
    pub fn new(classifier: Arc<dyn ClaimClassifier>, relevance_floor: f32) -> Self {
        Self {
            classifier,
            relevance_floor,
        }
    }

    /// Grounds a draft against the request's evidence.
    ///
    /// `fallback` is the refusal reason used when no claim survives.
    #[must_use]
    pub fn assemble(
        &self,
        request_id: &RequestId,
        draft: &DraftAnswer,
        evidence: &AggregatedEvidence,
        tiers_consulted: Vec<Tier>,
        fallback: RefusalReason,
    ) -> GroundedAnswer {
        let fragment_tokens: Vec<HashSet<String>> = evidence
            .ranked
            .iter()
            .map(|r| text::token_set(&r.fragment.text))
            .collect();

        let mut citations: Vec<FragmentId> = Vec::new();
        let mut sentences: Vec<String> = Vec::new();
        let mut unsupported: Vec<String> = Vec::new();

        for claim in &draft.claims {
            let claim_text = claim.text.trim();
            if claim_text.is_empty() {
                continue;
            }
            let claim_tokens = text::token_set(claim_text);
            let support: Vec<f32> = fragment_tokens
                .iter()
                .map(|tokens| text::containment(&claim_tokens, tokens))
                .collect();

            let mut cited: Vec<usize> = Vec::new();
            for id in &claim.citations {
                match evidence.ranked.iter().position(|r| r.fragment.id == *id) {
                    Some(idx) if support[idx] >= self.relevance_floor => {
                        if !cited.contains(&idx) {
                            cited.push(idx);
                        }
                    },
                    Some(_) => {},
                    None => debug!(
                        request_id = %request_id,
                        fragment_id = %id,
                        "Discarding citation outside this request's evidence"
                    ),
                }
            }
            if cited.is_empty()
                && let Some(best) = best_support(&support, self.relevance_floor)
            {
                cited.push(best);
            }

            if cited.is_empty() {
                if self.classifier.is_critical(claim_text) {
                    unsupported.push(claim_text.to_string());
                } else {
                    sentences.push(claim_text.to_string());
                }
                continue;
            }

            let markers: Vec<String> = cited
                .into_iter()
                .map(|idx| {
                    let id = &evidence.ranked[idx].fragment.id;
                    let n = citations.iter().position(|c| c == id).unwrap_or_else(|| {
                        citations.push(id.clone());
                        citations.len() - 1
                    });
                    format!("[{}]", n + 1)
                })
                .collect();
            sentences.push(format!("{claim_text} {}", markers.join("")));
        }

        if citations.is_empty() {
            return GroundedAnswer::refusal(request_id.clone(), fallback, unsupported, tiers_consulted);
        }

        let sources = citations
            .iter()
            .filter_map(|id| evidence.get(id))
            .map(|r| CitedSource {
                fragment_id: r.fragment.id.clone(),
                tier: r.fragment.tier,
                locator: r.fragment.source_ref.to_string(),
            })
            .collect();

        GroundedAnswer {
            request_id: request_id.clone(),
            answer_text: sentences.join(" "),
            citations,
            unsupported_claims: unsupported,
            refused: false,
            refusal_reason: None,
            sources,
            tiers_consulted,
        }
    }
}

/// Index of the most supportive fragment at or above the floor; earliest wins ties.
fn best_support(support: &[f32], floor: f32) -> Option<usize> {
    support
        .iter()
        .enumerate()
        .filter(|(_, s)| **s >= floor && **s > 0.0)
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, b)) if b >= *s => best,
            _ => Some((i, *s)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DraftClaim;
    use crate::models::{EvidenceFragment, SessionId, SourceRef};
    use crate::services::aggregator::RankedFragment;
    use crate::services::claims::HeuristicClaimClassifier;

    fn evidence(texts: &[(&str, &str)]) -> AggregatedEvidence {
        AggregatedEvidence {
            ranked: texts
                .iter()
                .map(|(id, text)| RankedFragment {
                    fragment: Arc::new(EvidenceFragment::new(
                        *id,
                        Tier::SessionMemory,
                        SourceRef::Transcript {
                            session_id: SessionId::new("s1"),
                            start_ms: 60_000,
                            end_ms: 65_000,
                            speaker: Some("Ana".to_string()),
                        },
                        *text,
                        0.9,
                        0,
                    )),
                    normalized_score: 0.9,
                    rank_score: 0.9,
                })
                .collect(),
            ..AggregatedEvidence::default()
        }
    }

    fn assembler() -> AnswerAssembler {
        AnswerAssembler::new(Arc::new(HeuristicClaimClassifier::new()), 0.35)
    }

    fn claim(text: &str, ids: &[&str]) -> DraftClaim {
        DraftClaim::new(text, ids.iter().map(|i| FragmentId::new(*i)).collect())
    }

    #[test]
    fn test_supported_claims_get_markers() {
        let ev = evidence(&[
            ("t0:s1:0", "We agreed the budget is 40k for Q3."),
            ("t0:s1:1", "Ana will send the vendor shortlist on Friday."),
        ]);
        let draft = DraftAnswer {
            claims: vec![
                claim("The Q3 budget is 40k.", &["t0:s1:0"]),
                claim("Ana will send the vendor shortlist.", &["t0:s1:1"]),
                claim("The budget was agreed for Q3.", &["t0:s1:0"]),
            ],
        };
        let answer = assembler().assemble(
            &RequestId::new("r1"),
            &draft,
            &ev,
            vec![Tier::SessionMemory],
            RefusalReason::InsufficientEvidence,
        );
        assert!(!answer.refused);
        assert_eq!(
            answer.answer_text,
            "The Q3 budget is 40k. [1] Ana will send the vendor shortlist. [2] The budget was agreed for Q3. [1]"
        );
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.sources[0].locator, "[01:00-01:05 | transcript | Ana]");
    }

    #[test]
    fn test_unsupported_critical_claim_is_withheld() {
        let ev = evidence(&[("t0:s1:0", "We agreed the budget is 40k for Q3.")]);
        let draft = DraftAnswer {
            claims: vec![
                claim("The Q3 budget is 40k.", &["t0:s1:0"]),
                claim("Headcount grows by 12 engineers.", &["t0:s1:0"]),
            ],
        };
        let answer = assembler().assemble(
            &RequestId::new("r1"),
            &draft,
            &ev,
            vec![Tier::SessionMemory],
            RefusalReason::InsufficientEvidence,
        );
        assert!(!answer.refused);
        assert!(!answer.answer_text.contains("Headcount"));
        assert_eq!(answer.unsupported_claims, vec!["Headcount grows by 12 engineers."]);
    }

    #[test]
    fn test_foreign_citation_is_replaced_by_supporting_fragment() {
        let ev = evidence(&[("t0:s1:0", "The launch moved to April.")]);
        let draft = DraftAnswer {
            claims: vec![claim("The launch moved to April.", &["t1:other-request:3"])],
        };
        let answer = assembler().assemble(
            &RequestId::new("r1"),
            &draft,
            &ev,
            vec![Tier::SessionMemory],
            RefusalReason::InsufficientEvidence,
        );
        assert_eq!(answer.citations, vec![FragmentId::new("t0:s1:0")]);
    }

    #[test]
    fn test_nothing_supported_is_a_refusal() {
        let ev = evidence(&[("t0:s1:0", "The launch moved to April.")]);
        let draft = DraftAnswer {
            claims: vec![claim("Revenue grew 12% last year.", &["t0:s1:0"])],
        };
        let answer = assembler().assemble(
            &RequestId::new("r1"),
            &draft,
            &ev,
            vec![Tier::SessionMemory],
            RefusalReason::EscalationRejected,
        );
        assert!(answer.refused);
        assert_eq!(answer.refusal_reason, Some(RefusalReason::EscalationRejected));
        assert!(answer.citations.is_empty());
        assert_eq!(answer.unsupported_claims.len(), 1);
    }
}
