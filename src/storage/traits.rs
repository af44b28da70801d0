//! Evidence store trait.
//!
//! Every evidence tier is read through one interface. Adapters are synchronous
//! and run on the blocking pool; the retrieval gateway owns timeouts,
//! cancellation and failure absorption.
//!
//! # Error Modes and Guarantees
//!
//! | Situation | Adapter returns | Gateway turns it into |
//! |-----------|-----------------|-----------------------|
//! | Collaborator down, HTTP error, open circuit | `Err(TierUnavailable)` | zero fragments + audited failure |
//! | Budget exceeded | (cut off by gateway) | zero fragments + audited timeout |
//! | Malformed fragment in an `Ok` batch | the fragment | fragment dropped + audited |
//!
//! Scores are tier-local: a `0.8` from session memory and a `0.8` from web
//! search mean different things. Cross-tier comparison happens only after
//! per-tier normalization in the aggregator.

use crate::Result;
use crate::models::{CostEstimate, EvidenceFragment, RetrievalRequest, Tier};
use std::time::Duration;

/// Trait for evidence tier adapters.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn EvidenceStore>`
/// - Use interior mutability (e.g., `RwLock`) for appendable state
/// - Every returned fragment must carry [`EvidenceStore::tier`] as its tier
/// - Respect `budget` where the backend allows it (HTTP timeouts, scan cut-off)
pub trait EvidenceStore: Send + Sync {
    /// The tier this adapter serves.
    fn tier(&self) -> Tier;

    /// Short adapter name for logs and metrics.
    fn name(&self) -> &str;

    /// Returns scored fragments relevant to the request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TierUnavailable`] when the backing source cannot
    /// serve the query. The engine never surfaces this to callers.
    fn query(&self, request: &RetrievalRequest, budget: Duration) -> Result<Vec<EvidenceFragment>>;

    /// Estimated cost of running this query, for gated tiers.
    fn estimate_cost(&self, _request: &RetrievalRequest) -> Option<CostEstimate> {
        None
    }
}
