//! Evidence store resilience wrapper with circuit breaking.
//!
//! Protects the engine from repeatedly waiting on a tier that keeps failing.
//! An open breaker fails fast with [`Error::TierUnavailable`], which the
//! retrieval gateway absorbs as zero fragments.
//!
//! # Circuit Breaker States
//!
//! ```text
//! +--------+     failures >= threshold     +------+
//! | Closed | --------------------------->  | Open |
//! +--------+                               +------+
//!     ^                                        |
//!     |  success                               | timeout elapsed
//!     |                                        v
//!     +--------------------------------  +-----------+
//!                                        | Half-Open |
//!                                        +-----------+
//! ```

use super::EvidenceStore;
use crate::config::ResilienceSettings;
use crate::models::{CostEstimate, EvidenceFragment, RetrievalRequest, Tier};
use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

/// Circuit breaker for one evidence store.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    tier: Tier,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given settings.
    #[must_use]
    pub fn new(settings: &ResilienceSettings, tier: Tier) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: settings.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(settings.breaker_reset_timeout_ms),
            half_open_max_calls: settings.breaker_half_open_max_calls.max(1),
            tier,
        }
    }

    /// Checks if a request is allowed through the circuit breaker.
    pub fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::info!(tier = %self.tier, "Circuit breaker transitioning to half-open");
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    /// Records a successful operation, closing the circuit.
    pub fn on_success(&mut self) {
        if !matches!(self.state, BreakerState::Closed { failures: 0 }) {
            tracing::info!(tier = %self.tier, "Circuit breaker closing after success");
        }
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Records a failed operation. Returns `true` if the circuit just opened.
    pub fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    tracing::warn!(
                        tier = %self.tier,
                        failures = *failures,
                        threshold = self.failure_threshold,
                        "Circuit breaker opened after consecutive failures"
                    );
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                tracing::warn!(tier = %self.tier, "Circuit breaker re-opened after half-open failure");
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    /// Returns the current state as a numeric value for metrics.
    ///
    /// - 0: Closed
    /// - 1: Open
    /// - 2: Half-Open
    #[must_use]
    pub const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// Evidence store wrapper with circuit breaker protection.
pub struct ResilientStore<S: EvidenceStore> {
    inner: S,
    breaker: Mutex<CircuitBreaker>,
}

impl<S: EvidenceStore> ResilientStore<S> {
    /// Wraps a store.
    #[must_use]
    pub fn new(inner: S, settings: &ResilienceSettings) -> Self {
        let tier = inner.tier();
        Self {
            inner,
            breaker: Mutex::new(CircuitBreaker::new(settings, tier)),
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Current breaker state (0 closed, 1 open, 2 half-open).
    #[must_use]
    pub fn breaker_state(&self) -> u8 {
        self.breaker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state_value()
    }

    fn record_metrics(&self, status: &'static str, state: u8) {
        metrics::counter!(
            "groundline_store_requests_total",
            "tier" => self.inner.tier().as_str(),
            "status" => status
        )
        .increment(1);
        metrics::gauge!(
            "groundline_store_circuit_breaker_state",
            "tier" => self.inner.tier().as_str()
        )
        .set(f64::from(state));
    }
}

impl<S: EvidenceStore> EvidenceStore for ResilientStore<S> {
    fn tier(&self) -> Tier {
        self.inner.tier()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn query(&self, request: &RetrievalRequest, budget: Duration) -> Result<Vec<EvidenceFragment>> {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        if !breaker.allow() {
            let state = breaker.state_value();
            drop(breaker);
            self.record_metrics("circuit_open", state);
            return Err(Error::TierUnavailable {
                tier: self.inner.tier().number(),
                reason: format!("circuit breaker open for '{}'", self.inner.name()),
            });
        }
        drop(breaker);

        let result = self.inner.query(request, budget);

        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        let (status, tripped) = match &result {
            Ok(_) => {
                breaker.on_success();
                ("success", false)
            },
            Err(_) => ("error", breaker.on_failure()),
        };
        let state = breaker.state_value();
        drop(breaker);
        self.record_metrics(status, state);
        if tripped {
            metrics::counter!(
                "groundline_store_circuit_breaker_trips_total",
                "tier" => self.inner.tier().as_str()
            )
            .increment(1);
        }

        result
    }

    fn estimate_cost(&self, request: &RetrievalRequest) -> Option<CostEstimate> {
        self.inner.estimate_cost(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::StaticStore;

    fn settings(threshold: u32, reset_ms: u64) -> ResilienceSettings {
        ResilienceSettings {
            breaker_failure_threshold: threshold,
            breaker_reset_timeout_ms: reset_ms,
            breaker_half_open_max_calls: 1,
        }
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(&settings(2, 60_000), Tier::WebSearch);
        assert!(breaker.allow());
        assert!(!breaker.on_failure());
        assert!(breaker.on_failure());
        assert_eq!(breaker.state_value(), 1);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_breaker_half_open_then_closes() {
        let mut breaker = CircuitBreaker::new(&settings(1, 0), Tier::Documents);
        assert!(breaker.on_failure());
        assert!(breaker.allow());
        assert_eq!(breaker.state_value(), 2);
        assert!(!breaker.allow());
        breaker.on_success();
        assert_eq!(breaker.state_value(), 0);
    }

    #[test]
    fn test_open_circuit_fails_fast_without_calling_inner() {
        let inner = StaticStore::empty(Tier::Documents).with_failure("offline");
        let store = ResilientStore::new(inner, &settings(1, 60_000));
        let request = RetrievalRequest::realtime(&EngineConfig::default(), "s", "q");

        assert!(store.query(&request, Duration::ZERO).is_err());
        assert_eq!(store.breaker_state(), 1);
        let result = store.query(&request, Duration::ZERO);
        assert!(matches!(result, Err(Error::TierUnavailable { tier: 1, .. })));
        assert_eq!(store.inner().query_count(), 1);
    }
}
