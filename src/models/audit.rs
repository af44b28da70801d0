//! Audit event kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an audit trail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// The request entered the engine.
    RequestReceived,
    /// A tier query completed (payload carries latency and fragment count).
    TierQuery,
    /// A tier failed or timed out and contributed zero fragments.
    TierFailure,
    /// A malformed fragment was dropped during aggregation.
    FragmentDropped,
    /// A coverage check produced a verdict.
    CoverageVerdict,
    /// A tool proposal was created.
    ProposalCreated,
    /// A proposal was approved.
    ApprovalGranted,
    /// A proposal was rejected.
    ApprovalRejected,
    /// A proposal expired without a decision.
    ApprovalExpired,
    /// A decision arrived for a proposal that no longer waits.
    ApprovalIgnored,
    /// A gated tier was skipped without a proposal (cost, missing adapter).
    EscalationSkipped,
    /// A grounded answer was produced.
    AnswerFinal,
    /// A refusal was produced.
    Refusal,
    /// The request was cancelled.
    RequestCancelled,
}

impl AuditEventType {
    /// Returns the event type as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestReceived => "request_received",
            Self::TierQuery => "tier_query",
            Self::TierFailure => "tier_failure",
            Self::FragmentDropped => "fragment_dropped",
            Self::CoverageVerdict => "coverage_verdict",
            Self::ProposalCreated => "proposal_created",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalRejected => "approval_rejected",
            Self::ApprovalExpired => "approval_expired",
            Self::ApprovalIgnored => "approval_ignored",
            Self::EscalationSkipped => "escalation_skipped",
            Self::AnswerFinal => "answer_final",
            Self::Refusal => "refusal",
            Self::RequestCancelled => "request_cancelled",
        }
    }

    /// Returns true for entries that close a request trail.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AnswerFinal | Self::Refusal)
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
