//! Security features.
//!
//! Tamper-evident audit recording of every tier access and escalation decision.

mod audit;

pub use audit::{AuditEntry, AuditRecorder, GENESIS_HMAC, verify_entries};
