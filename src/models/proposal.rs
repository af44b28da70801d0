//! Tool proposals awaiting human approval.

use super::{ProposalId, RequestId, Tier};
use crate::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A gated tool that needs approval before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Tier 2 web search.
    WebSearch,
    /// Tier 3 deep research.
    DeepResearch,
}

impl ToolName {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::DeepResearch => "deep_research",
        }
    }

    /// Returns the tier this tool unlocks.
    #[must_use]
    pub const fn tier(self) -> Tier {
        match self {
            Self::WebSearch => Tier::WebSearch,
            Self::DeepResearch => Tier::DeepResearch,
        }
    }

    /// Returns the tool guarding a tier, if the tier is gated.
    #[must_use]
    pub const fn for_tier(tier: Tier) -> Option<Self> {
        match tier {
            Tier::WebSearch => Some(Self::WebSearch),
            Tier::DeepResearch => Some(Self::DeepResearch),
            Tier::SessionMemory | Tier::Documents => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Waiting for a decision.
    Proposed,
    /// A human approved the tool call.
    Approved,
    /// A human rejected the tool call.
    Rejected,
    /// The wait window elapsed, or the request went away.
    Expired,
}

impl ProposalStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    /// Returns true once no further decision can change the status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Proposed)
    }

    /// Parses a status string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "approved" | "approve" | "yes" | "y" => Some(Self::Approved),
            "rejected" | "reject" | "no" | "n" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated cost of one gated tier query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Monetary cost in the deployment's unit (typically USD).
    pub cost: f64,
    /// Expected latency in milliseconds.
    pub expected_latency_ms: u64,
}

/// A request to run a gated tool, surfaced to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProposal {
    /// Proposal identifier.
    pub proposal_id: ProposalId,
    /// Request that produced the proposal.
    pub request_id: RequestId,
    /// Tool to run.
    pub tool_name: ToolName,
    /// Why the controller wants to escalate.
    pub rationale: String,
    /// Current status.
    pub status: ProposalStatus,
    /// Creation time (Unix epoch milliseconds).
    pub created_at: u64,
    /// Decision time, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<u64>,
    /// Who decided, once terminal. `system` for expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// Adapter cost estimate, when the adapter provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<CostEstimate>,
}

impl ToolProposal {
    /// Creates a new proposal in `proposed` status.
    #[must_use]
    pub fn new(request_id: RequestId, tool_name: ToolName, rationale: impl Into<String>) -> Self {
        Self {
            proposal_id: ProposalId::generate(),
            request_id,
            tool_name,
            rationale: rationale.into(),
            status: ProposalStatus::Proposed,
            created_at: current_timestamp_ms(),
            decided_at: None,
            decided_by: None,
            cost_estimate: None,
        }
    }

    /// Attaches a cost estimate.
    #[must_use]
    pub const fn with_cost_estimate(mut self, estimate: Option<CostEstimate>) -> Self {
        self.cost_estimate = estimate;
        self
    }

    /// Records a terminal decision.
    ///
    /// Returns false, leaving the proposal untouched, if it was already terminal
    /// or the given status is not terminal.
    pub fn decide(&mut self, status: ProposalStatus, decided_by: impl Into<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.decided_at = Some(current_timestamp_ms());
        self.decided_by = Some(decided_by.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_is_single_shot() {
        let mut proposal = ToolProposal::new(RequestId::new("r1"), ToolName::WebSearch, "low coverage");
        assert_eq!(proposal.status, ProposalStatus::Proposed);
        assert!(proposal.decide(ProposalStatus::Approved, "host"));
        assert_eq!(proposal.decided_by.as_deref(), Some("host"));
        assert!(proposal.decided_at.is_some());
        assert!(!proposal.decide(ProposalStatus::Rejected, "someone-else"));
        assert_eq!(proposal.status, ProposalStatus::Approved);
    }

    #[test]
    fn test_decide_requires_terminal_status() {
        let mut proposal = ToolProposal::new(RequestId::new("r1"), ToolName::DeepResearch, "x");
        assert!(!proposal.decide(ProposalStatus::Proposed, "host"));
        assert!(proposal.decided_at.is_none());
    }

    #[test]
    fn test_tool_names_map_to_gated_tiers() {
        assert_eq!(ToolName::WebSearch.as_str(), "web_search");
        assert_eq!(ToolName::for_tier(Tier::DeepResearch), Some(ToolName::DeepResearch));
        assert_eq!(ToolName::for_tier(Tier::Documents), None);
        assert_eq!(ProposalStatus::parse("Y"), Some(ProposalStatus::Approved));
    }
}
