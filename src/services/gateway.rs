//! Concurrent tier queries under budget.
//!
//! Adapters are synchronous, so each query runs on the blocking pool wrapped in
//! a timeout. A wave of tiers runs concurrently; the gateway waits for all of
//! them or their budgets, whichever comes first. A failed or timed-out tier
//! contributes zero fragments and leaves an audit entry behind.

use super::router::TierBudget;
use crate::models::{EngineEvent, EventMeta, EvidenceFragment, RetrievalRequest, Tier};
use crate::observability::{EventBus, current_request_context, enter_request_context};
use crate::security::AuditRecorder;
use crate::storage::EvidenceStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What one tier contributed to a wave.
#[derive(Debug, Clone)]
pub struct TierOutcome {
    /// The tier.
    pub tier: Tier,
    /// Raw fragments, not yet validated. Shared with every later aggregation pass.
    pub fragments: Vec<Arc<EvidenceFragment>>,
    /// Wall time spent.
    pub latency: Duration,
    /// Why the tier contributed nothing, if it failed.
    pub failure: Option<String>,
}

impl TierOutcome {
    /// Returns true if the tier failed or timed out.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Runs tier queries for the engine.
pub struct RetrievalGateway {
    stores: BTreeMap<Tier, Arc<dyn EvidenceStore>>,
    audit: Arc<AuditRecorder>,
    events: EventBus,
}

impl RetrievalGateway {
    /// Creates a gateway over the registered adapters.
    #[must_use]
    pub fn new(
        stores: BTreeMap<Tier, Arc<dyn EvidenceStore>>,
        audit: Arc<AuditRecorder>,
        events: EventBus,
    ) -> Self {
        Self {
            stores,
            audit,
            events,
        }
    }

    /// Tiers with a registered adapter.
    pub fn tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.stores.keys().copied()
    }

    /// Adapter for a tier.
    #[must_use]
    pub fn store(&self, tier: Tier) -> Option<&Arc<dyn EvidenceStore>> {
        self.stores.get(&tier)
    }

    /// Queries a wave of tiers concurrently.
    ///
    /// Returns `None` if `cancel` fires first; in-flight queries are abandoned
    /// and their results discarded. Outcomes are ordered by tier.
    pub async fn query_wave(
        &self,
        request: &Arc<RetrievalRequest>,
        wave: &[TierBudget],
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<Vec<TierOutcome>> {
        let mut tasks = JoinSet::new();
        for planned in wave {
            let Some(store) = self.stores.get(&planned.tier).cloned() else {
                continue;
            };
            tasks.spawn(run_query(
                store,
                Arc::clone(request),
                *planned,
            ));
        }

        let mut outcomes = Vec::with_capacity(wave.len());
        loop {
            tokio::select! {
                biased;
                () = cancelled(cancel) => {
                    tasks.abort_all();
                    debug!(request_id = %request.request_id, "Abandoned in-flight tier queries");
                    return None;
                }
                next = tasks.join_next() => match next {
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(e)) => warn!(error = %e, "Tier query task failed to join"),
                    None => break,
                }
            }
        }

        outcomes.sort_by_key(|o| o.tier);
        for outcome in &outcomes {
            self.record(request, outcome);
        }
        Some(outcomes)
    }

    fn record(&self, request: &RetrievalRequest, outcome: &TierOutcome) {
        let tier = outcome.tier;
        let latency_ms = u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX);

        metrics::counter!("groundline_tier_queries_total", "tier" => tier.as_str()).increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("groundline_tier_query_duration_ms", "tier" => tier.as_str())
            .record(latency_ms as f64);

        if let Some(reason) = &outcome.failure {
            warn!(
                request_id = %request.request_id,
                tier = %tier,
                latency_ms,
                reason = %reason,
                "Tier contributed no evidence"
            );
            metrics::counter!("groundline_tier_failures_total", "tier" => tier.as_str())
                .increment(1);
            self.audit.report_failure(&request.request_id, tier, reason);
        } else {
            debug!(
                request_id = %request.request_id,
                tier = %tier,
                latency_ms,
                fragments = outcome.fragments.len(),
                "Tier query completed"
            );
            self.audit.record(
                &request.request_id,
                crate::models::AuditEventType::TierQuery,
                Some(tier),
                format!(
                    "{tier} returned {} fragments in {latency_ms}ms",
                    outcome.fragments.len()
                ),
                serde_json::json!({
                    "latency_ms": latency_ms,
                    "fragment_count": outcome.fragments.len(),
                }),
            );
        }

        self.events.publish(EngineEvent::TierCompleted {
            meta: EventMeta::new("gateway", request.request_id.clone()),
            tier,
            fragment_count: outcome.fragments.len(),
            latency_ms,
            failed: outcome.failed(),
        });
    }
}

async fn run_query(
    store: Arc<dyn EvidenceStore>,
    request: Arc<RetrievalRequest>,
    planned: TierBudget,
) -> TierOutcome {
    let started = Instant::now();
    let context = current_request_context();
    let budget = planned.budget;

    let handle = tokio::task::spawn_blocking(move || {
        let _guard = context.map(enter_request_context);
        store.query(&request, budget)
    });

    let (fragments, failure) = match tokio::time::timeout(budget, handle).await {
        Ok(Ok(Ok(fragments))) => (fragments.into_iter().map(Arc::new).collect(), None),
        Ok(Ok(Err(e))) => (Vec::new(), Some(e.to_string())),
        Ok(Err(e)) => (Vec::new(), Some(format!("adapter task failed: {e}"))),
        Err(_) => (
            Vec::new(),
            Some(format!("timed out after {}ms", budget.as_millis())),
        ),
    };

    TierOutcome {
        tier: planned.tier,
        fragments,
        latency: started.elapsed(),
        failure,
    }
}

/// Resolves once the cancel flag is set. Never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
