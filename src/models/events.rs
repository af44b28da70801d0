//! Engine event types for observability and client notification.

use super::{ProposalId, ProposalStatus, RefusalReason, RequestId, SessionId, Tier, ToolName};
use crate::current_timestamp_ms;
use uuid::Uuid;

/// Shared event metadata.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Request the event belongs to.
    pub request_id: RequestId,
    /// Event source component.
    pub source: &'static str,
    /// Timestamp (Unix epoch milliseconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates new event metadata using the current timestamp.
    #[must_use]
    pub fn new(source: &'static str, request_id: RequestId) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id,
            source,
            timestamp: current_timestamp_ms(),
        }
    }
}

/// Events emitted while a request moves through the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A request entered the engine.
    RequestStarted {
        /// Event metadata.
        meta: EventMeta,
        /// Session the request belongs to.
        session_id: SessionId,
    },
    /// A tier finished (successfully or not).
    TierCompleted {
        /// Event metadata.
        meta: EventMeta,
        /// The tier.
        tier: Tier,
        /// Fragments contributed.
        fragment_count: usize,
        /// Wall time in milliseconds.
        latency_ms: u64,
        /// Whether the tier failed or timed out.
        failed: bool,
    },
    /// A gated tool was proposed and awaits a decision.
    ProposalCreated {
        /// Event metadata.
        meta: EventMeta,
        /// The proposal.
        proposal_id: ProposalId,
        /// The tool.
        tool_name: ToolName,
        /// Why escalation is wanted.
        rationale: String,
    },
    /// A proposal reached a terminal status.
    ProposalResolved {
        /// Event metadata.
        meta: EventMeta,
        /// The proposal.
        proposal_id: ProposalId,
        /// Final status.
        status: ProposalStatus,
    },
    /// The request produced its final answer or refusal.
    AnswerReady {
        /// Event metadata.
        meta: EventMeta,
        /// Whether the answer is a refusal.
        refused: bool,
        /// Refusal reason, when refused.
        refusal_reason: Option<RefusalReason>,
        /// Number of citations.
        citation_count: usize,
    },
}

impl EngineEvent {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RequestStarted { .. } => "request.started",
            Self::TierCompleted { .. } => "tier.completed",
            Self::ProposalCreated { .. } => "proposal.created",
            Self::ProposalResolved { .. } => "proposal.resolved",
            Self::AnswerReady { .. } => "answer.ready",
        }
    }

    /// Returns the event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::RequestStarted { meta, .. }
            | Self::TierCompleted { meta, .. }
            | Self::ProposalCreated { meta, .. }
            | Self::ProposalResolved { meta, .. }
            | Self::AnswerReady { meta, .. } => meta,
        }
    }

    /// Returns the request the event belongs to.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.meta().request_id
    }
}
