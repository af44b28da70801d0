//! Escalation controller state machine.
//!
//! ```text
//! INIT -> TIER01_QUERIED -> COVERAGE_CHECK -> SUFFICIENT -> ANSWERING -> DONE
//!                                          \-> ESCALATE_PROPOSED -> AWAITING_APPROVAL
//!                                          \-> ANSWERING (escalation not allowed)
//! AWAITING_APPROVAL -> APPROVED_ESCALATING -> COVERAGE_CHECK | ANSWERING
//! AWAITING_APPROVAL -> REJECTED -> ANSWERING
//! ESCALATE_PROPOSED -> ANSWERING (tier skipped on cost or missing adapter)
//! any -> DONE (cancellation)
//! ```
//!
//! The controller only tracks state; the engine drives it and records each
//! transition.

use crate::models::{RequestId, Tier};
use crate::{Error, Result};
use std::fmt;

/// Controller state for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscalationState {
    /// Request accepted, nothing queried.
    Init,
    /// The initial wave has returned.
    Tier01Queried,
    /// Evaluating coverage.
    CoverageCheck,
    /// Coverage met the threshold.
    Sufficient,
    /// A gated tier is about to be proposed.
    EscalateProposed,
    /// Parked until a decision or expiry.
    AwaitingApproval,
    /// Approved; querying the gated tier.
    ApprovedEscalating,
    /// Rejected or expired.
    Rejected,
    /// Assembling the answer or refusal.
    Answering,
    /// Terminal.
    Done,
}

impl EscalationState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Tier01Queried => "TIER01_QUERIED",
            Self::CoverageCheck => "COVERAGE_CHECK",
            Self::Sufficient => "SUFFICIENT",
            Self::EscalateProposed => "ESCALATE_PROPOSED",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::ApprovedEscalating => "APPROVED_ESCALATING",
            Self::Rejected => "REJECTED",
            Self::Answering => "ANSWERING",
            Self::Done => "DONE",
        }
    }

    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use EscalationState::{
            Answering, ApprovedEscalating, AwaitingApproval, CoverageCheck, Done, EscalateProposed,
            Init, Rejected, Sufficient, Tier01Queried,
        };
        if matches!(next, Done) {
            return !matches!(self, Done);
        }
        matches!(
            (self, next),
            (Init, Tier01Queried)
                | (Tier01Queried, CoverageCheck)
                | (CoverageCheck, Sufficient | EscalateProposed | Answering)
                | (Sufficient, Answering)
                | (EscalateProposed, AwaitingApproval | Answering)
                | (AwaitingApproval, ApprovedEscalating | Rejected)
                | (ApprovedEscalating, CoverageCheck | Answering)
                | (Rejected, Answering)
        )
    }
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one request's position in the state machine and which gated tiers
/// it has already escalated to.
#[derive(Debug)]
pub struct EscalationController {
    request_id: RequestId,
    state: EscalationState,
    history: Vec<EscalationState>,
    escalated: Vec<Tier>,
}

impl EscalationController {
    /// Creates a controller in `INIT`.
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            state: EscalationState::Init,
            history: vec![EscalationState::Init],
            escalated: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> EscalationState {
        self.state
    }

    /// Every state visited, in order.
    #[must_use]
    pub fn history(&self) -> &[EscalationState] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for an illegal move; the state is
    /// left unchanged.
    pub fn transition(&mut self, next: EscalationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(
            request_id = %self.request_id,
            from = %self.state,
            to = %next,
            "Escalation transition"
        );
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Next gated tier to try, if any.
    ///
    /// Tier 2 comes before Tier 3; each is tried at most once and only when
    /// the request allows it. Nothing follows Tier 3.
    #[must_use]
    pub fn next_gated_tier(&self, allow_web: bool, allow_deep_research: bool) -> Option<Tier> {
        if self.escalated.contains(&Tier::DeepResearch) {
            return None;
        }
        if allow_web && !self.escalated.contains(&Tier::WebSearch) {
            return Some(Tier::WebSearch);
        }
        (allow_deep_research && !self.escalated.contains(&Tier::DeepResearch))
            .then_some(Tier::DeepResearch)
    }

    /// Marks a gated tier as used up, whatever its outcome.
    pub fn mark_escalated(&mut self, tier: Tier) {
        if !self.escalated.contains(&tier) {
            self.escalated.push(tier);
        }
    }

    /// Gated tiers already attempted.
    #[must_use]
    pub fn escalated(&self) -> &[Tier] {
        &self.escalated
    }
}
