//! Human approval of gated tools.
//!
//! A proposal is pushed to an [`ApprovalChannel`]; the decision comes back
//! later through [`ApprovalHub::on_decision`]. Waiting requests park on a
//! oneshot receiver, so nothing busy-waits. Every proposal resolves exactly
//! once: by decision, by expiry, or by cancellation of its request. Decisions
//! that arrive after that are audited and otherwise ignored, as long as the
//! closure is younger than the hub's retention window; older closures are
//! forgotten and their decisions come back as [`DecisionAck::Unknown`].

use crate::models::{AuditEventType, ProposalId, ProposalStatus, RequestId, ToolProposal};
use crate::security::AuditRecorder;
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Outbound side of the approval protocol.
///
/// Implementations deliver proposals to whoever can approve them (a UI, a
/// chat, a queue). Delivery failure is not fatal: the proposal simply expires.
pub trait ApprovalChannel: Send + Sync {
    /// Surfaces a proposal for decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the proposal could not be delivered.
    fn propose(&self, proposal: &ToolProposal) -> Result<()>;
}

/// A human decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// `approved` or `rejected`.
    pub status: ProposalStatus,
    /// Who decided.
    pub decided_by: String,
}

/// What happened to a decision handed to [`ApprovalHub::on_decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAck {
    /// The waiting request received it.
    Delivered,
    /// The request was cancelled; the decision has no effect.
    IgnoredCancelled,
    /// The proposal already resolved (decided or expired).
    AlreadyResolved,
    /// No such proposal.
    Unknown,
    /// Only `approved` and `rejected` can be submitted.
    InvalidStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
    Decided,
    Expired,
    Cancelled,
}

struct Pending {
    request_id: RequestId,
    sender: oneshot::Sender<Decision>,
}

/// Default time a closed proposal is remembered.
pub const DEFAULT_CLOSED_RETENTION: Duration = Duration::from_secs(600);

#[derive(Default)]
struct HubState {
    pending: HashMap<ProposalId, Pending>,
    closed: HashMap<ProposalId, (RequestId, Closure, Instant)>,
    // Closure order, oldest first.
    closed_order: VecDeque<(Instant, ProposalId)>,
}

impl HubState {
    fn close(
        &mut self,
        proposal_id: &ProposalId,
        request_id: RequestId,
        closure: Closure,
        retention: Duration,
    ) {
        let now = Instant::now();
        self.prune(now, retention);
        self.closed
            .insert(proposal_id.clone(), (request_id, closure, now));
        self.closed_order.push_back((now, proposal_id.clone()));
    }

    fn prune(&mut self, now: Instant, retention: Duration) {
        while let Some((at, _)) = self.closed_order.front() {
            if now.saturating_duration_since(*at) < retention {
                break;
            }
            let Some((at, id)) = self.closed_order.pop_front() else {
                break;
            };
            // A re-closed proposal has a newer entry further back.
            if self.closed.get(&id).is_some_and(|(_, _, closed_at)| *closed_at == at) {
                self.closed.remove(&id);
            }
        }
    }
}

/// Routes decisions to parked requests.
pub struct ApprovalHub {
    state: Mutex<HubState>,
    audit: Arc<AuditRecorder>,
    retention: Duration,
}

impl ApprovalHub {
    /// Creates a hub that audits ignored decisions.
    #[must_use]
    pub fn new(audit: Arc<AuditRecorder>) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            audit,
            retention: DEFAULT_CLOSED_RETENTION,
        }
    }

    /// Sets how long closed proposals are remembered for late decisions.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Number of closed proposals still remembered.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
            .len()
    }

    /// Registers a proposal and returns the receiver its request parks on.
    pub fn register(&self, proposal: &ToolProposal) -> oneshot::Receiver<Decision> {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.insert(
            proposal.proposal_id.clone(),
            Pending {
                request_id: proposal.request_id.clone(),
                sender,
            },
        );
        receiver
    }

    /// Number of proposals awaiting a decision.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    /// Ids of proposals awaiting a decision for one request.
    #[must_use]
    pub fn pending_for(&self, request_id: &RequestId) -> Vec<ProposalId> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .iter()
            .filter(|(_, p)| p.request_id == *request_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Delivers a decision.
    pub fn on_decision(
        &self,
        proposal_id: &ProposalId,
        status: ProposalStatus,
        decided_by: &str,
    ) -> DecisionAck {
        if !matches!(status, ProposalStatus::Approved | ProposalStatus::Rejected) {
            warn!(proposal_id = %proposal_id, status = %status, "Refusing non-decision status");
            return DecisionAck::InvalidStatus;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = state.pending.remove(proposal_id) {
            let request_id = pending.request_id.clone();
            let decision = Decision {
                status,
                decided_by: decided_by.to_string(),
            };
            if pending.sender.send(decision).is_ok() {
                state.close(proposal_id, request_id, Closure::Decided, self.retention);
                debug!(proposal_id = %proposal_id, status = %status, "Decision delivered");
                return DecisionAck::Delivered;
            }
            // Receiver gone: the request stopped waiting without telling us.
            state.close(proposal_id, request_id.clone(), Closure::Expired, self.retention);
            drop(state);
            self.audit_ignored(&request_id, proposal_id, status, decided_by, "request no longer waiting");
            return DecisionAck::AlreadyResolved;
        }

        let closed = state
            .closed
            .get(proposal_id)
            .map(|(request_id, closure, _)| (request_id.clone(), *closure));
        drop(state);
        match closed {
            Some((request_id, Closure::Cancelled)) => {
                self.audit_ignored(&request_id, proposal_id, status, decided_by, "request cancelled");
                DecisionAck::IgnoredCancelled
            },
            Some((request_id, closure)) => {
                let why = if closure == Closure::Expired {
                    "proposal expired"
                } else {
                    "proposal already decided"
                };
                self.audit_ignored(&request_id, proposal_id, status, decided_by, why);
                DecisionAck::AlreadyResolved
            },
            None => {
                warn!(proposal_id = %proposal_id, "Decision for unknown proposal");
                DecisionAck::Unknown
            },
        }
    }

    /// Expires a proposal that is still pending.
    ///
    /// Returns false if a decision got there first; the caller should then
    /// read it from its receiver.
    pub fn expire(&self, proposal_id: &ProposalId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.pending.remove(proposal_id) {
            Some(pending) => {
                state.close(proposal_id, pending.request_id, Closure::Expired, self.retention);
                true
            },
            None => false,
        }
    }

    /// Closes every pending proposal of a cancelled request.
    ///
    /// Returns the closed proposal ids. Later decisions for them are audited
    /// as ignored.
    pub fn cancel_request(&self, request_id: &RequestId) -> Vec<ProposalId> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<ProposalId> = state
            .pending
            .iter()
            .filter(|(_, p)| p.request_id == *request_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            state.pending.remove(id);
            state.close(id, request_id.clone(), Closure::Cancelled, self.retention);
        }
        ids
    }

    /// Marks a proposal as closed by cancellation, pending or not.
    pub fn mark_cancelled(&self, proposal: &ToolProposal) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.remove(&proposal.proposal_id);
        state.close(
            &proposal.proposal_id,
            proposal.request_id.clone(),
            Closure::Cancelled,
            self.retention,
        );
    }

    fn audit_ignored(
        &self,
        request_id: &RequestId,
        proposal_id: &ProposalId,
        status: ProposalStatus,
        decided_by: &str,
        why: &str,
    ) {
        metrics::counter!("groundline_approval_ignored_total").increment(1);
        self.audit.record(
            request_id,
            AuditEventType::ApprovalIgnored,
            None,
            format!("ignored: {why}"),
            serde_json::json!({
                "proposal_id": proposal_id.as_str(),
                "status": status.as_str(),
                "decided_by": decided_by,
            }),
        );
    }
}

/// Approval channel that forwards proposals to an async receiver.
pub struct QueueApprovalChannel {
    sender: mpsc::Sender<ToolProposal>,
}

impl QueueApprovalChannel {
    /// Creates a bounded queue and its receiving end.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ToolProposal>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ApprovalChannel for QueueApprovalChannel {
    fn propose(&self, proposal: &ToolProposal) -> Result<()> {
        self.sender
            .try_send(proposal.clone())
            .map_err(|e| Error::OperationFailed {
                operation: "propose".to_string(),
                cause: e.to_string(),
            })
    }
}

/// Channel used when nobody can approve; every proposal expires.
pub struct UnavailableApprovalChannel;

impl ApprovalChannel for UnavailableApprovalChannel {
    fn propose(&self, _proposal: &ToolProposal) -> Result<()> {
        Err(Error::OperationFailed {
            operation: "propose".to_string(),
            cause: "no approval channel configured".to_string(),
        })
    }
}
