//! Engine services.
//!
//! | Service | Role |
//! |---------|------|
//! | [`TierRouter`] | Picks tiers and splits the latency budget |
//! | [`RetrievalGateway`] | Runs adapter queries concurrently under budgets |
//! | [`EscalationController`] | Per-request escalation state machine |
//! | [`ApprovalHub`] | Parks requests until a human decides |
//! | [`EvidenceAggregator`] | Normalizes, deduplicates and ranks fragments |
//! | [`AnswerAssembler`] | Keeps only claims the evidence supports |
//! | [`AnsweringEngine`] | Drives all of the above for one request |

// Allow cast precision loss for score and budget arithmetic.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Lock guards are held only across map lookups.
#![allow(clippy::significant_drop_tightening)]

mod aggregator;
mod approval;
mod assembler;
mod claims;
mod engine;
mod escalation;
mod gateway;
mod normalizer;
mod router;

pub use aggregator::{AggregatedEvidence, DroppedFragment, EvidenceAggregator, RankedFragment};
pub use approval::{
    ApprovalChannel, ApprovalHub, DEFAULT_CLOSED_RETENTION, Decision, DecisionAck,
    QueueApprovalChannel, UnavailableApprovalChannel,
};
pub use assembler::AnswerAssembler;
pub use claims::{ClaimClassifier, ClaimKind, HeuristicClaimClassifier};
pub use engine::{AnsweringEngine, AnsweringEngineBuilder, CancelHandle};
pub use escalation::{EscalationController, EscalationState};
pub use gateway::{RetrievalGateway, TierOutcome};
pub use normalizer::{
    ClampNormalizer, LogisticNormalizer, MaxScaleNormalizer, NormalizerRegistry, ScoreNormalizer,
};
pub use router::{TierBudget, TierPlan, TierRouter};
