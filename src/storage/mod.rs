//! Evidence store adapters.
//!
//! One adapter per evidence tier, all behind [`EvidenceStore`]:
//!
//! | Tier | Adapter | Backing |
//! |------|---------|---------|
//! | 0 | [`SessionMemoryStore`] | Append-only per-session snapshots |
//! | 1 | [`DocumentIndex`] | In-memory hybrid keyword/vector passages |
//! | 2, 3 | [`HttpSearchStore`] | JSON search collaborator |
//! | any | [`StaticStore`] | Fixed fragments (fixtures, tests) |
//!
//! [`ResilientStore`] wraps any adapter in a circuit breaker.

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - lock guards are already dropped explicitly.
#![allow(clippy::significant_drop_tightening)]

mod document_index;
mod http_search;
pub mod resilience;
mod session_memory;
mod static_store;
mod traits;

pub use document_index::{DocumentIndex, DocumentInput};
pub use http_search::HttpSearchStore;
pub use resilience::{CircuitBreaker, ResilientStore};
pub use session_memory::{SessionEntry, SessionMemoryStore};
pub use static_store::StaticStore;
pub use traits::EvidenceStore;
