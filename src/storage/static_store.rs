//! Fixture-backed evidence store.
//!
//! Returns a fixed set of fragments, optionally after a delay or with a
//! failure. Used by the CLI fixture loader and by engine tests that need to
//! count how often a tier was queried.

use super::EvidenceStore;
use crate::models::{CostEstimate, EvidenceFragment, RetrievalRequest, Tier};
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fixed-fragment adapter.
pub struct StaticStore {
    tier: Tier,
    name: String,
    fragments: Vec<EvidenceFragment>,
    delay: Option<Duration>,
    failure: Option<String>,
    cost: Option<CostEstimate>,
    queries: AtomicUsize,
}

impl StaticStore {
    /// Creates a store serving the given fragments.
    #[must_use]
    pub fn new(tier: Tier, fragments: Vec<EvidenceFragment>) -> Self {
        Self {
            tier,
            name: format!("static_{}", tier.as_str()),
            fragments,
            delay: None,
            failure: None,
            cost: None,
            queries: AtomicUsize::new(0),
        }
    }

    /// Creates a store with no fragments.
    #[must_use]
    pub fn empty(tier: Tier) -> Self {
        Self::new(tier, Vec::new())
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every query with the given reason.
    #[must_use]
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Reports a cost estimate.
    #[must_use]
    pub const fn with_cost(mut self, cost: f64, expected_latency_ms: u64) -> Self {
        self.cost = Some(CostEstimate {
            cost,
            expected_latency_ms,
        });
        self
    }

    /// Number of `query` calls so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl EvidenceStore for StaticStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, _request: &RetrievalRequest, _budget: Duration) -> Result<Vec<EvidenceFragment>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if let Some(reason) = &self.failure {
            return Err(Error::TierUnavailable {
                tier: self.tier.number(),
                reason: reason.clone(),
            });
        }
        Ok(self.fragments.clone())
    }

    fn estimate_cost(&self, _request: &RetrievalRequest) -> Option<CostEstimate> {
        self.cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::SourceRef;

    #[test]
    fn test_counts_queries_and_fails_on_request() {
        let fragment = EvidenceFragment::new(
            "w1",
            Tier::WebSearch,
            SourceRef::Url {
                url: "https://example.com".to_string(),
                title: None,
            },
            "text",
            0.7,
            0,
        );
        let store = StaticStore::new(Tier::WebSearch, vec![fragment]).with_cost(0.1, 500);
        let request = RetrievalRequest::realtime(&EngineConfig::default(), "s", "q");
        assert_eq!(store.query(&request, Duration::ZERO).map(|f| f.len()).unwrap_or(0), 1);
        assert_eq!(store.query_count(), 1);
        assert!(store.estimate_cost(&request).is_some());

        let failing = StaticStore::empty(Tier::Documents).with_failure("index offline");
        assert!(failing.query(&request, Duration::ZERO).is_err());
        assert_eq!(failing.query_count(), 1);
    }
}
