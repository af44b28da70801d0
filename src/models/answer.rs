//! Grounded answers and refusals.

use super::{FragmentId, RequestId, Tier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an answer was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// No tier produced any evidence and none could be escalated to.
    NoTiersAvailable,
    /// Coverage was insufficient and the request forbids escalation.
    EscalationDenied,
    /// A human rejected the proposal, or it expired.
    EscalationRejected,
    /// Coverage was sufficient but no claim survived grounding.
    InsufficientEvidence,
    /// Escalated tiers were exhausted and evidence was still missing.
    InsufficientEvidenceAfterEscalation,
    /// The request was cancelled before an answer was produced.
    Cancelled,
}

impl RefusalReason {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoTiersAvailable => "no_tiers_available",
            Self::EscalationDenied => "escalation_denied",
            Self::EscalationRejected => "escalation_rejected",
            Self::InsufficientEvidence => "insufficient_evidence",
            Self::InsufficientEvidenceAfterEscalation => "insufficient_evidence_after_escalation",
            Self::Cancelled => "cancelled",
        }
    }

    /// User-facing refusal text.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoTiersAvailable => "I could not find any source for this question.",
            Self::EscalationDenied => {
                "The available session material does not support an answer, and searching further is not permitted for this question."
            },
            Self::EscalationRejected => {
                "The session material does not support an answer, and the external search was not approved."
            },
            Self::InsufficientEvidence => {
                "The retrieved material does not contain enough evidence to answer this question."
            },
            Self::InsufficientEvidenceAfterEscalation => {
                "Even after searching further, I could not find enough evidence to answer this question."
            },
            Self::Cancelled => "The question was cancelled.",
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A citation target rendered for clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedSource {
    /// Cited fragment.
    pub fragment_id: FragmentId,
    /// Tier the fragment came from.
    pub tier: Tier,
    /// Human-readable locator.
    pub locator: String,
}

/// The engine's final output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundedAnswer {
    /// Request this answers.
    pub request_id: RequestId,
    /// Answer text with `[n]` markers indexing into `citations` (1-based).
    pub answer_text: String,
    /// Cited fragment ids, in marker order.
    pub citations: Vec<FragmentId>,
    /// Critical claims left out for lack of support.
    pub unsupported_claims: Vec<String>,
    /// True if the engine declined to answer.
    pub refused: bool,
    /// Why, when refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<RefusalReason>,
    /// Rendered sources, parallel to `citations`.
    #[serde(default)]
    pub sources: Vec<CitedSource>,
    /// Tiers whose evidence was consulted.
    #[serde(default)]
    pub tiers_consulted: Vec<Tier>,
}

impl GroundedAnswer {
    /// Builds a refusal.
    #[must_use]
    pub fn refusal(
        request_id: RequestId,
        reason: RefusalReason,
        unsupported_claims: Vec<String>,
        tiers_consulted: Vec<Tier>,
    ) -> Self {
        Self {
            request_id,
            answer_text: reason.message().to_string(),
            citations: Vec::new(),
            unsupported_claims,
            refused: true,
            refusal_reason: Some(reason),
            sources: Vec::new(),
            tiers_consulted,
        }
    }

    /// Returns true if any cited source came from the given tier.
    #[must_use]
    pub fn cites_tier(&self, tier: Tier) -> bool {
        self.sources.iter().any(|s| s.tier == tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_shape() {
        let answer = GroundedAnswer::refusal(
            RequestId::new("r1"),
            RefusalReason::EscalationRejected,
            vec!["Revenue grew 12%".to_string()],
            vec![Tier::SessionMemory, Tier::Documents],
        );
        assert!(answer.refused);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.refusal_reason, Some(RefusalReason::EscalationRejected));
        assert!(!answer.cites_tier(Tier::SessionMemory));
    }

    #[test]
    fn test_refusal_reason_wire_names() {
        let json = serde_json::to_string(&RefusalReason::InsufficientEvidenceAfterEscalation)
            .unwrap_or_default();
        assert_eq!(json, "\"insufficient_evidence_after_escalation\"");
        assert_eq!(RefusalReason::Cancelled.to_string(), "cancelled");
    }
}
