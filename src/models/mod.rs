//! Data models for groundline.
//!
//! This module contains the core data structures that flow through the engine:
//! requests, evidence fragments, coverage assessments, tool proposals, answers,
//! and the event/audit vocabulary around them.

mod answer;
mod audit;
mod coverage;
mod events;
mod evidence;
mod ids;
mod proposal;
mod request;

pub use answer::{CitedSource, GroundedAnswer, RefusalReason};
pub use audit::AuditEventType;
pub use coverage::{CoverageAssessment, CoverageVerdict};
pub use events::{EngineEvent, EventMeta};
pub use evidence::{EvidenceFragment, SourceRef, Tier};
pub use ids::{FragmentId, ProposalId, RequestId, SessionId};
pub use proposal::{CostEstimate, ProposalStatus, ToolName, ToolProposal};
pub use request::{RetrievalMode, RetrievalRequest};
