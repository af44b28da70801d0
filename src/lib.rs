//! # Groundline
//!
//! Tiered retrieval and grounded answering for meeting and study companions.
//!
//! Groundline decides, for every incoming question, which evidence tiers to
//! consult, when to escalate beyond internal evidence, how to assemble an answer
//! whose claims carry citations, and when to refuse instead of guessing.
//!
//! ## Evidence tiers
//!
//! | Tier | Source | Gated |
//! |------|--------|-------|
//! | 0 | Session memory (transcript, visual events, recaps) | no |
//! | 1 | Uploaded documents | no |
//! | 2 | Web search | human approval |
//! | 3 | Deep research (best effort) | human approval |
//!
//! ## Example
//!
//! ```rust,ignore
//! use groundline::{AnsweringEngine, EngineConfig, RetrievalRequest, SessionId};
//!
//! let engine = AnsweringEngine::builder(EngineConfig::default())
//!     .with_store(session_memory)
//!     .with_store(document_index)
//!     .build()?;
//!
//! let request = RetrievalRequest::realtime(&config, SessionId::new("standup"), "what did we decide?");
//! let answer = engine.answer(request).await;
//! for id in &answer.citations {
//!     println!("cited {id}");
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod embedding;
pub mod llm;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
pub mod storage;
pub mod text;

// Re-exports for convenience
pub use config::EngineConfig;
pub use embedding::Embedder;
pub use llm::{AnswerGenerator, LlmProvider};
pub use models::{
    AuditEventType, CoverageAssessment, CoverageVerdict, EvidenceFragment, FragmentId,
    GroundedAnswer, ProposalId, ProposalStatus, RefusalReason, RequestId, RetrievalMode,
    RetrievalRequest, SessionId, SourceRef, Tier, ToolName, ToolProposal,
};
pub use security::{AuditEntry, AuditRecorder};
pub use services::{AnsweringEngine, ApprovalChannel, ApprovalHub, CancelHandle};
pub use storage::EvidenceStore;

/// Error type for groundline operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Reaches `answer()` caller? |
/// |---------|-------------|----------------------------|
/// | `InvalidInput` | Bad configuration values, malformed fixtures | no (construction time) |
/// | `OperationFailed` | I/O, HTTP, parsing failures | no |
/// | `TierUnavailable` | Adapter failure, timeout, open circuit | no, absorbed as zero fragments |
/// | `EscalationDenied` | Request policy forbids a gated tier | no, becomes a refusal reason |
/// | `ApprovalTimeout` | No human decision inside the wait window | no, treated as rejection |
/// | `InsufficientEvidence` | Every permitted tier exhausted | no, becomes a refusal |
/// | `AggregationError` | Adapter produced a malformed fragment | no, fragment is dropped |
/// | `InvalidTransition` | Escalation state machine misuse | no, engine bug guard |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A configuration value is out of range (thresholds outside `0.0..=1.0`)
    /// - A fixture file cannot be mapped onto evidence stores
    /// - A request has an empty query
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Config or fixture files cannot be read or parsed
    /// - HTTP calls to search or LLM collaborators fail
    /// - The audit file sink cannot be opened
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An evidence tier could not serve a query.
    #[error("tier {tier} unavailable: {reason}")]
    TierUnavailable {
        /// Tier number (0..=3).
        tier: u8,
        /// Why the tier failed.
        reason: String,
    },

    /// Escalation to a gated tier is not permitted for this request.
    #[error("escalation denied: {reason}")]
    EscalationDenied {
        /// The policy reason.
        reason: String,
    },

    /// No approval decision arrived within the wait window.
    #[error("approval for proposal {proposal_id} timed out")]
    ApprovalTimeout {
        /// The proposal that expired.
        proposal_id: String,
    },

    /// All permitted tiers were exhausted without enough evidence.
    #[error("insufficient evidence: {reason}")]
    InsufficientEvidence {
        /// Summary of what was tried.
        reason: String,
    },

    /// An adapter produced a fragment that cannot be aggregated.
    #[error("malformed fragment '{fragment_id}': {reason}")]
    AggregationError {
        /// Identifier of the offending fragment (may be empty).
        fragment_id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The escalation state machine was asked to take an illegal edge.
    #[error("invalid escalation transition {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
}

/// Result type alias for groundline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// ```rust
/// use groundline::current_timestamp_ms;
///
/// assert!(current_timestamp_ms() > 0);
/// ```
#[must_use]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");

        let err = Error::TierUnavailable {
            tier: 2,
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "tier 2 unavailable: timeout");

        let err = Error::InvalidTransition {
            from: "INIT".to_string(),
            to: "ANSWERING".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid escalation transition INIT -> ANSWERING"
        );
    }
}
