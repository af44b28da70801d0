//! The answering engine.
//!
//! Drives one request through routing, the initial tier wave, coverage checks,
//! gated escalation with human approval, aggregation and grounded assembly.
//! [`AnsweringEngine::answer`] always returns a well-formed [`GroundedAnswer`];
//! every failure mode ends as an answer or a refusal with a reason.
//!
//! # Example
//!
//! ```rust,no_run
//! use groundline::{AnsweringEngine, EngineConfig, RetrievalRequest};
//! use groundline::storage::StaticStore;
//! use groundline::models::Tier;
//! use std::sync::Arc;
//!
//! # async fn example() -> groundline::Result<()> {
//! let config = EngineConfig::default();
//! let engine = AnsweringEngine::builder(config.clone())
//!     .with_store(Arc::new(StaticStore::empty(Tier::SessionMemory)))
//!     .build()?;
//!
//! let answer = engine
//!     .answer(RetrievalRequest::realtime(&config, "session-1", "What did we decide?"))
//!     .await;
//! assert!(answer.refused);
//! # Ok(())
//! # }
//! ```

use super::aggregator::{AggregatedEvidence, EvidenceAggregator};
use super::approval::{
    ApprovalChannel, ApprovalHub, DEFAULT_CLOSED_RETENTION, Decision, DecisionAck,
    UnavailableApprovalChannel,
};
use super::assembler::AnswerAssembler;
use super::claims::{ClaimClassifier, HeuristicClaimClassifier};
use super::escalation::{EscalationController, EscalationState};
use super::gateway::{RetrievalGateway, TierOutcome, cancelled};
use super::normalizer::NormalizerRegistry;
use super::router::{TierBudget, TierPlan, TierRouter};
use crate::config::EngineConfig;
use crate::llm::{AnswerGenerator, DraftAnswer, generator_from_settings};
use crate::models::{
    AuditEventType, CostEstimate, CoverageAssessment, EngineEvent, EventMeta, GroundedAnswer,
    ProposalId, ProposalStatus, RefusalReason, RequestId, RetrievalMode, RetrievalRequest,
    SessionId, Tier, ToolName, ToolProposal,
};
use crate::observability::{EventBus, RequestContext, scope_request_context};
use crate::security::{AuditEntry, AuditRecorder};
use crate::storage::EvidenceStore;
use crate::Result;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{Instrument, debug, info, info_span, warn};

const SOURCE: &str = "engine";

struct InFlight {
    session_id: SessionId,
    cancel: watch::Sender<bool>,
}

/// Requests currently being answered, with their cancel signals.
struct InFlightRegistry {
    requests: Mutex<HashMap<RequestId, InFlight>>,
    approvals: Arc<ApprovalHub>,
}

impl InFlightRegistry {
    fn cancel(&self, request_id: &RequestId) -> bool {
        let requests = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = requests.get(request_id) else {
            return false;
        };
        // Close proposals before waking the request so late decisions are
        // already classified as cancelled.
        self.approvals.cancel_request(request_id);
        entry.cancel.send_replace(true);
        true
    }

    fn cancel_where(&self, predicate: impl Fn(&RequestId, &InFlight) -> bool) -> usize {
        let ids: Vec<RequestId> = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, entry)| predicate(id, entry))
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }
}

/// Cloneable handle that cancels in-flight requests from anywhere (for
/// example a Ctrl-C handler).
#[derive(Clone)]
pub struct CancelHandle {
    registry: Arc<InFlightRegistry>,
}

impl CancelHandle {
    /// Cancels one request. Returns false if it is not in flight.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.registry.cancel(request_id)
    }

    /// Cancels every in-flight request of a session.
    pub fn cancel_session(&self, session_id: &SessionId) -> usize {
        self.registry
            .cancel_where(|_, entry| entry.session_id == *session_id)
    }

    /// Cancels everything in flight.
    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_where(|_, _| true)
    }
}

/// How a proposal wait ended.
enum WaitOutcome {
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

/// What woke a parked request.
enum Woken {
    Cancelled,
    Decision(Decision),
    ChannelClosed,
    TimedOut,
}

/// Builder for [`AnsweringEngine`].
pub struct AnsweringEngineBuilder {
    config: EngineConfig,
    stores: BTreeMap<Tier, Arc<dyn EvidenceStore>>,
    approval_channel: Option<Arc<dyn ApprovalChannel>>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    classifier: Option<Arc<dyn ClaimClassifier>>,
    normalizers: Option<NormalizerRegistry>,
    audit: Option<Arc<AuditRecorder>>,
    events: Option<EventBus>,
}

impl AnsweringEngineBuilder {
    /// Registers an adapter for its tier, replacing any previous one.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EvidenceStore>) -> Self {
        if let Some(previous) = self.stores.insert(store.tier(), store) {
            debug!(tier = %previous.tier(), replaced = previous.name(), "Replaced tier adapter");
        }
        self
    }

    /// Sets the approval channel for gated tiers.
    #[must_use]
    pub fn with_approval_channel(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.approval_channel = Some(channel);
        self
    }

    /// Sets the answer generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the claim classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ClaimClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Sets the score normalizers.
    #[must_use]
    pub fn with_normalizers(mut self, normalizers: NormalizerRegistry) -> Self {
        self.normalizers = Some(normalizers);
        self
    }

    /// Shares an audit recorder.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditRecorder>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Shares an event bus.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a claim pattern does
    /// not compile, the LLM provider is unknown or the audit file cannot be
    /// opened.
    pub fn build(self) -> Result<AnsweringEngine> {
        self.config.validate()?;

        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(HeuristicClaimClassifier::from_policy(&self.config.claims)?),
        };
        let generator = match self.generator {
            Some(generator) => generator,
            None => generator_from_settings(&self.config.llm)?,
        };
        let audit = match self.audit {
            Some(audit) => audit,
            None => Arc::new(AuditRecorder::from_settings(&self.config.audit)?),
        };
        let events = self.events.unwrap_or_default();
        let normalizers = self
            .normalizers
            .unwrap_or_else(|| NormalizerRegistry::from_policy(&self.config.ranking));

        let router = TierRouter::new(self.config.routing.clone(), self.stores.keys().copied());
        let aggregator = EvidenceAggregator::new(
            self.config.ranking.clone(),
            normalizers,
            self.config.max_fragments_per_answer,
        );
        let assembler =
            AnswerAssembler::new(classifier, self.config.critical_claim_relevance_floor);
        let gateway = RetrievalGateway::new(self.stores, Arc::clone(&audit), events.clone());
        let longest_wait = self
            .config
            .tier2_wait_timeout_ms
            .max(self.config.batch_approval_wait_ms);
        let approvals = Arc::new(
            ApprovalHub::new(Arc::clone(&audit))
                .with_retention(DEFAULT_CLOSED_RETENTION + Duration::from_millis(longest_wait)),
        );

        info!(
            tiers = ?gateway.tiers().collect::<Vec<_>>(),
            generator = generator.name(),
            "Answering engine ready"
        );

        Ok(AnsweringEngine {
            in_flight: Arc::new(InFlightRegistry {
                requests: Mutex::new(HashMap::new()),
                approvals: Arc::clone(&approvals),
            }),
            approval_channel: self
                .approval_channel
                .unwrap_or_else(|| Arc::new(UnavailableApprovalChannel)),
            config: self.config,
            router,
            gateway,
            aggregator,
            assembler,
            generator,
            approvals,
            audit,
            events,
        })
    }
}

/// Tiered retrieval and grounded answering.
pub struct AnsweringEngine {
    config: EngineConfig,
    router: TierRouter,
    gateway: RetrievalGateway,
    aggregator: EvidenceAggregator,
    assembler: AnswerAssembler,
    generator: Arc<dyn AnswerGenerator>,
    approval_channel: Arc<dyn ApprovalChannel>,
    approvals: Arc<ApprovalHub>,
    audit: Arc<AuditRecorder>,
    events: EventBus,
    in_flight: Arc<InFlightRegistry>,
}

/// Mutable state of one request while it runs.
struct RunState {
    request: Arc<RetrievalRequest>,
    controller: EscalationController,
    outcomes: Vec<TierOutcome>,
    audited_drops: usize,
    escalation_queried: bool,
    escalation_rejected: bool,
    escalation_skipped: bool,
}

impl RunState {
    fn tiers_consulted(&self) -> Vec<Tier> {
        self.outcomes
            .iter()
            .filter(|o| !o.failed())
            .map(|o| o.tier)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn tiers_queried(&self) -> BTreeSet<Tier> {
        self.outcomes.iter().map(|o| o.tier).collect()
    }

    fn transition(&mut self, next: EscalationState) {
        if let Err(e) = self.controller.transition(next) {
            warn!(request_id = %self.request.request_id, error = %e, "Escalation state machine rejected transition");
        }
    }

    /// Refusal reason when insufficient coverage leaves nothing to say.
    const fn fallback_reason(&self) -> RefusalReason {
        if self.escalation_queried {
            RefusalReason::InsufficientEvidenceAfterEscalation
        } else if self.escalation_rejected {
            RefusalReason::EscalationRejected
        } else if self.escalation_skipped {
            RefusalReason::EscalationDenied
        } else {
            RefusalReason::NoTiersAvailable
        }
    }
}

impl AnsweringEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder(config: EngineConfig) -> AnsweringEngineBuilder {
        AnsweringEngineBuilder {
            config,
            stores: BTreeMap::new(),
            approval_channel: None,
            generator: None,
            classifier: None,
            normalizers: None,
            audit: None,
            events: None,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The audit recorder.
    #[must_use]
    pub const fn audit(&self) -> &Arc<AuditRecorder> {
        &self.audit
    }

    /// Audit trail of one request.
    #[must_use]
    pub fn get_trail(&self, request_id: &RequestId) -> Vec<AuditEntry> {
        self.audit.get_trail(request_id)
    }

    /// Subscribes to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The engine's event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// The approval hub.
    #[must_use]
    pub const fn approvals(&self) -> &Arc<ApprovalHub> {
        &self.approvals
    }

    /// Delivers a human decision on a proposal.
    pub fn on_decision(
        &self,
        proposal_id: &ProposalId,
        status: ProposalStatus,
        decided_by: &str,
    ) -> DecisionAck {
        self.approvals.on_decision(proposal_id, status, decided_by)
    }

    /// Cancels one in-flight request.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.in_flight.cancel(request_id)
    }

    /// Cancels every in-flight request of a session (for example when the
    /// session ends).
    pub fn cancel_session(&self, session_id: &SessionId) -> usize {
        self.cancel_handle().cancel_session(session_id)
    }

    /// Handle for cancelling from other tasks or threads.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            registry: Arc::clone(&self.in_flight),
        }
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Answers a request.
    ///
    /// Never fails: errors become refusals, and the full decision path is in
    /// the audit trail under the request id.
    ///
    /// A request whose id is already in flight is refused as cancelled
    /// without touching the running request or its trail.
    pub async fn answer(&self, request: RetrievalRequest) -> GroundedAnswer {
        let request_id = request.request_id.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let duplicate = match self
            .in_flight
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(request_id.clone())
        {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    session_id: request.session_id.clone(),
                    cancel: cancel_tx,
                });
                false
            },
        };
        if duplicate {
            warn!(request_id = %request_id, "Request id already in flight; refusing duplicate");
            metrics::counter!("groundline_refusals_total", "reason" => RefusalReason::Cancelled.as_str())
                .increment(1);
            return GroundedAnswer::refusal(
                request_id,
                RefusalReason::Cancelled,
                Vec::new(),
                Vec::new(),
            );
        }

        let span = info_span!(
            "answer",
            request_id = %request_id,
            session_id = %request.session_id,
            mode = %request.mode
        );
        let context = RequestContext::new(request_id.clone(), request.session_id.clone());
        let started = Instant::now();

        let answer = scope_request_context(context, self.run(request, cancel_rx))
            .instrument(span)
            .await;

        self.in_flight
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("groundline_answer_duration_ms").record(elapsed_ms as f64);
        answer
    }

    async fn run(
        &self,
        request: RetrievalRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> GroundedAnswer {
        let request = Arc::new(request);
        let request_id = request.request_id.clone();
        metrics::counter!("groundline_requests_total", "mode" => request.mode.as_str())
            .increment(1);

        self.audit.record(
            &request_id,
            AuditEventType::RequestReceived,
            None,
            format!("{} request: {}", request.mode, request.query_text),
            serde_json::json!({
                "session_id": request.session_id.as_str(),
                "mode": request.mode.as_str(),
                "max_latency_ms": request.max_latency_ms,
                "min_coverage_threshold": request.min_coverage_threshold,
                "allow_web": request.allow_web,
                "allow_deep_research": request.allow_deep_research,
            }),
        );
        self.events.publish(EngineEvent::RequestStarted {
            meta: EventMeta::new(SOURCE, request_id.clone()),
            session_id: request.session_id.clone(),
        });

        let mut state = RunState {
            request: Arc::clone(&request),
            controller: EscalationController::new(request_id.clone()),
            outcomes: Vec::new(),
            audited_drops: 0,
            escalation_queried: false,
            escalation_rejected: false,
            escalation_skipped: false,
        };

        if request.query_text.trim().is_empty() {
            warn!("Rejecting request with empty query");
            state.transition(EscalationState::Done);
            return self.finish(
                &mut state,
                GroundedAnswer::refusal(
                    request_id,
                    RefusalReason::InsufficientEvidence,
                    Vec::new(),
                    Vec::new(),
                ),
            );
        }

        let plan = self.router.plan(&request);
        debug!(tiers = ?plan.tiers(), "Tier plan");

        let Some(first_wave) = self
            .gateway
            .query_wave(&request, &plan.initial_wave(), &mut cancel)
            .await
        else {
            return self.finish_cancelled(&mut state, None);
        };
        state.outcomes.extend(first_wave);
        state.transition(EscalationState::Tier01Queried);

        loop {
            state.transition(EscalationState::CoverageCheck);
            let evidence = self.aggregate(&mut state);
            let coverage = self.check_coverage(&state, &evidence);

            if coverage.is_sufficient() {
                state.transition(EscalationState::Sufficient);
                state.transition(EscalationState::Answering);
                return self
                    .assemble(&mut state, &evidence, RefusalReason::InsufficientEvidence, &mut cancel)
                    .await;
            }

            if !request.allows_escalation() {
                state.transition(EscalationState::Answering);
                let reason = if evidence.is_empty() {
                    RefusalReason::NoTiersAvailable
                } else {
                    RefusalReason::EscalationDenied
                };
                let tiers = state.tiers_consulted();
                return self.finish(
                    &mut state,
                    GroundedAnswer::refusal(request_id, reason, Vec::new(), tiers),
                );
            }

            let Some((tier, budget, estimate)) = self.next_escalation(&mut state, &plan) else {
                state.transition(EscalationState::Answering);
                let fallback = state.fallback_reason();
                return self.assemble(&mut state, &evidence, fallback, &mut cancel).await;
            };

            state.transition(EscalationState::EscalateProposed);
            let Some(tool) = ToolName::for_tier(tier) else {
                state.transition(EscalationState::Answering);
                let fallback = state.fallback_reason();
                return self.assemble(&mut state, &evidence, fallback, &mut cancel).await;
            };
            let rationale = format!(
                "coverage {:.2} below threshold {:.2} after querying {}",
                coverage.best_score,
                request.min_coverage_threshold,
                describe_tiers(&coverage.tiers_queried)
            );
            let mut proposal =
                ToolProposal::new(request_id.clone(), tool, rationale).with_cost_estimate(estimate);

            state.transition(EscalationState::AwaitingApproval);
            match self
                .await_decision(&mut proposal, request.mode, &mut cancel)
                .await
            {
                WaitOutcome::Approved => {
                    state.transition(EscalationState::ApprovedEscalating);
                    let wave = [TierBudget { tier, budget }];
                    let Some(outcomes) = self.gateway.query_wave(&request, &wave, &mut cancel).await
                    else {
                        return self.finish_cancelled(&mut state, None);
                    };
                    state.outcomes.extend(outcomes);
                    state.escalation_queried = true;

                    if tier == Tier::DeepResearch {
                        // Deep research is the last resort; answer with what we have.
                        let evidence = self.aggregate(&mut state);
                        self.check_coverage(&state, &evidence);
                        state.transition(EscalationState::Answering);
                        let fallback = state.fallback_reason();
                        return self.assemble(&mut state, &evidence, fallback, &mut cancel).await;
                    }
                },
                WaitOutcome::Rejected | WaitOutcome::Expired => {
                    state.transition(EscalationState::Rejected);
                    state.escalation_rejected = true;
                    state.transition(EscalationState::Answering);
                    let fallback = state.fallback_reason();
                    return self.assemble(&mut state, &evidence, fallback, &mut cancel).await;
                },
                WaitOutcome::Cancelled => {
                    return self.finish_cancelled(&mut state, Some(&mut proposal));
                },
            }
        }
    }

    /// Picks the next gated tier that can actually be proposed, auditing the
    /// ones skipped on the way.
    fn next_escalation(
        &self,
        state: &mut RunState,
        plan: &TierPlan,
    ) -> Option<(Tier, Duration, Option<CostEstimate>)> {
        let request = Arc::clone(&state.request);
        loop {
            let tier = state
                .controller
                .next_gated_tier(request.allow_web, request.allow_deep_research)?;
            state.controller.mark_escalated(tier);

            let skip = |reason: String| {
                warn!(tier = %tier, reason = %reason, "Skipping escalation");
                self.audit.record(
                    &request.request_id,
                    AuditEventType::EscalationSkipped,
                    Some(tier),
                    format!("{tier} skipped: {reason}"),
                    serde_json::json!({ "reason": reason }),
                );
            };

            let Some(budget) = self.router.escalation_budget(&request, plan, tier) else {
                skip("no adapter registered or latency budget too small".to_string());
                state.escalation_skipped = true;
                continue;
            };

            let estimate = self
                .gateway
                .store(tier)
                .and_then(|store| store.estimate_cost(&request));
            if let (Some(limit), Some(estimate)) = (self.config.max_escalation_cost, estimate)
                && estimate.cost > limit
            {
                skip(format!(
                    "estimated cost {:.4} exceeds limit {limit:.4}",
                    estimate.cost
                ));
                state.escalation_skipped = true;
                continue;
            }

            return Some((tier, budget, estimate));
        }
    }

    fn aggregate(&self, state: &mut RunState) -> AggregatedEvidence {
        let evidence = self
            .aggregator
            .aggregate(&state.outcomes, state.request.issued_at_ms);

        for dropped in evidence.dropped.iter().skip(state.audited_drops) {
            warn!(
                tier = %dropped.tier,
                fragment_id = %dropped.fragment_id,
                reason = %dropped.reason,
                "Dropped malformed fragment"
            );
            metrics::counter!("groundline_fragments_dropped_total", "tier" => dropped.tier.as_str())
                .increment(1);
            self.audit.record(
                &state.request.request_id,
                AuditEventType::FragmentDropped,
                Some(dropped.tier),
                format!("dropped fragment '{}': {}", dropped.fragment_id, dropped.reason),
                serde_json::json!({
                    "fragment_id": dropped.fragment_id.as_str(),
                    "reason": dropped.reason,
                }),
            );
        }
        state.audited_drops = evidence.dropped.len();
        evidence
    }

    fn check_coverage(&self, state: &RunState, evidence: &AggregatedEvidence) -> CoverageAssessment {
        let coverage = CoverageAssessment::evaluate(
            state.request.request_id.clone(),
            state.tiers_queried(),
            evidence.best_score,
            evidence.len(),
            state.request.min_coverage_threshold,
        );
        debug!(
            best_score = coverage.best_score,
            fragments = coverage.fragment_count,
            verdict = %coverage.verdict,
            "Coverage check"
        );
        self.audit.record(
            &state.request.request_id,
            AuditEventType::CoverageVerdict,
            None,
            format!(
                "{}: best {:.3} vs threshold {:.3} over {} fragments",
                coverage.verdict,
                coverage.best_score,
                state.request.min_coverage_threshold,
                coverage.fragment_count
            ),
            serde_json::json!({
                "verdict": coverage.verdict.as_str(),
                "best_score": coverage.best_score,
                "fragment_count": coverage.fragment_count,
                "tiers_queried": coverage.tiers_queried.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            }),
        );
        coverage
    }

    fn approval_wait(&self, mode: RetrievalMode) -> Duration {
        Duration::from_millis(match mode {
            RetrievalMode::Realtime => self.config.tier2_wait_timeout_ms,
            RetrievalMode::Batch => self.config.batch_approval_wait_ms,
        })
    }

    /// Parks the request until a decision, expiry or cancellation.
    async fn await_decision(
        &self,
        proposal: &mut ToolProposal,
        mode: RetrievalMode,
        cancel: &mut watch::Receiver<bool>,
    ) -> WaitOutcome {
        let request_id = proposal.request_id.clone();
        let wait = self.approval_wait(mode);
        let mut receiver = self.approvals.register(proposal);

        metrics::counter!("groundline_proposals_total", "tool" => proposal.tool_name.as_str())
            .increment(1);
        self.audit.record(
            &request_id,
            AuditEventType::ProposalCreated,
            Some(proposal.tool_name.tier()),
            format!("proposed {}: {}", proposal.tool_name, proposal.rationale),
            serde_json::json!({
                "proposal_id": proposal.proposal_id.as_str(),
                "tool_name": proposal.tool_name.as_str(),
                "wait_ms": u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "cost": proposal.cost_estimate.map(|c| c.cost),
            }),
        );
        self.events.publish(EngineEvent::ProposalCreated {
            meta: EventMeta::new(SOURCE, request_id.clone()),
            proposal_id: proposal.proposal_id.clone(),
            tool_name: proposal.tool_name,
            rationale: proposal.rationale.clone(),
        });
        info!(proposal_id = %proposal.proposal_id, tool = %proposal.tool_name, "Awaiting approval");

        if let Err(e) = self.approval_channel.propose(proposal) {
            warn!(error = %e, "Approval channel unavailable; proposal will expire");
        }

        let woken = tokio::select! {
            biased;
            () = cancelled(cancel) => Woken::Cancelled,
            decision = &mut receiver => match decision {
                Ok(decision) => Woken::Decision(decision),
                Err(_) => Woken::ChannelClosed,
            },
            () = tokio::time::sleep(wait) => Woken::TimedOut,
        };

        let decision = match woken {
            Woken::Decision(decision) => Some(decision),
            Woken::TimedOut if !self.approvals.expire(&proposal.proposal_id) => {
                // A decision won the race against the timer.
                receiver.try_recv().ok()
            },
            Woken::TimedOut => None,
            // The hub only drops a waiting sender when the request is cancelled.
            Woken::Cancelled | Woken::ChannelClosed => {
                return WaitOutcome::Cancelled;
            },
        };

        let (status, decided_by, outcome, event) = match decision {
            Some(Decision {
                status: ProposalStatus::Approved,
                decided_by,
            }) => (
                ProposalStatus::Approved,
                decided_by,
                WaitOutcome::Approved,
                AuditEventType::ApprovalGranted,
            ),
            Some(Decision { decided_by, .. }) => (
                ProposalStatus::Rejected,
                decided_by,
                WaitOutcome::Rejected,
                AuditEventType::ApprovalRejected,
            ),
            None => (
                ProposalStatus::Expired,
                "system".to_string(),
                WaitOutcome::Expired,
                AuditEventType::ApprovalExpired,
            ),
        };
        self.resolve(proposal, status, &decided_by, event, None);
        outcome
    }

    fn resolve(
        &self,
        proposal: &mut ToolProposal,
        status: ProposalStatus,
        decided_by: &str,
        event: AuditEventType,
        note: Option<&str>,
    ) {
        proposal.decide(status, decided_by);
        metrics::counter!("groundline_approvals_total", "status" => status.as_str()).increment(1);
        info!(proposal_id = %proposal.proposal_id, status = %status, decided_by, "Proposal resolved");
        self.audit.record(
            &proposal.request_id,
            event,
            Some(proposal.tool_name.tier()),
            match note {
                Some(note) => format!("{} {status} by {decided_by}: {note}", proposal.tool_name),
                None => format!("{} {status} by {decided_by}", proposal.tool_name),
            },
            serde_json::json!({
                "proposal_id": proposal.proposal_id.as_str(),
                "status": status.as_str(),
                "decided_by": decided_by,
            }),
        );
        self.events.publish(EngineEvent::ProposalResolved {
            meta: EventMeta::new(SOURCE, proposal.request_id.clone()),
            proposal_id: proposal.proposal_id.clone(),
            status,
        });
    }

    /// Drafts and grounds the answer.
    async fn assemble(
        &self,
        state: &mut RunState,
        evidence: &AggregatedEvidence,
        fallback: RefusalReason,
        cancel: &mut watch::Receiver<bool>,
    ) -> GroundedAnswer {
        let request_id = state.request.request_id.clone();
        let tiers = state.tiers_consulted();
        if evidence.is_empty() {
            return self.finish(
                state,
                GroundedAnswer::refusal(request_id, fallback, Vec::new(), tiers),
            );
        }

        let generator = Arc::clone(&self.generator);
        let query = state.request.query_text.clone();
        let fragments: Vec<_> = evidence
            .ranked
            .iter()
            .map(|r| Arc::clone(&r.fragment))
            .collect();
        let handle = tokio::task::spawn_blocking(move || generator.draft(&query, &fragments));

        let draft = tokio::select! {
            biased;
            () = cancelled(cancel) => return self.finish_cancelled(state, None),
            joined = handle => match joined {
                Ok(Ok(draft)) => draft,
                Ok(Err(e)) => {
                    warn!(error = %e, "Answer generation failed");
                    DraftAnswer::default()
                },
                Err(e) => {
                    warn!(error = %e, "Answer generation task failed");
                    DraftAnswer::default()
                },
            },
        };

        let answer = self
            .assembler
            .assemble(&request_id, &draft, evidence, tiers, fallback);
        self.finish(state, answer)
    }

    fn finish_cancelled(
        &self,
        state: &mut RunState,
        proposal: Option<&mut ToolProposal>,
    ) -> GroundedAnswer {
        let request_id = state.request.request_id.clone();
        info!(state = %state.controller.state(), "Request cancelled");
        metrics::counter!("groundline_cancellations_total").increment(1);
        self.audit.record(
            &request_id,
            AuditEventType::RequestCancelled,
            None,
            format!("cancelled in {}", state.controller.state()),
            serde_json::json!({ "state": state.controller.state().as_str() }),
        );

        if let Some(proposal) = proposal {
            self.approvals.mark_cancelled(proposal);
            self.resolve(
                proposal,
                ProposalStatus::Expired,
                "system",
                AuditEventType::ApprovalExpired,
                Some("request cancelled"),
            );
        }

        state.transition(EscalationState::Done);
        let tiers = state.tiers_consulted();
        self.finish(
            state,
            GroundedAnswer::refusal(request_id, RefusalReason::Cancelled, Vec::new(), tiers),
        )
    }

    fn finish(&self, state: &mut RunState, answer: GroundedAnswer) -> GroundedAnswer {
        if state.controller.state() != EscalationState::Done {
            state.transition(EscalationState::Done);
        }
        let request_id = &state.request.request_id;

        if let Some(reason) = answer.refusal_reason {
            metrics::counter!("groundline_refusals_total", "reason" => reason.as_str()).increment(1);
            info!(reason = %reason, unsupported = answer.unsupported_claims.len(), "Refused");
            self.audit.record(
                request_id,
                AuditEventType::Refusal,
                None,
                format!("refused: {reason}"),
                serde_json::json!({
                    "reason": reason.as_str(),
                    "unsupported_claims": answer.unsupported_claims,
                    "tiers_consulted": answer.tiers_consulted.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                }),
            );
        } else {
            metrics::counter!("groundline_answers_total").increment(1);
            info!(
                citations = answer.citations.len(),
                unsupported = answer.unsupported_claims.len(),
                "Answered"
            );
            self.audit.record(
                request_id,
                AuditEventType::AnswerFinal,
                None,
                format!(
                    "answered with {} citations, {} unsupported claims withheld",
                    answer.citations.len(),
                    answer.unsupported_claims.len()
                ),
                serde_json::json!({
                    "citations": answer.citations.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
                    "unsupported_claims": answer.unsupported_claims,
                    "tiers_consulted": answer.tiers_consulted.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                }),
            );
        }

        self.events.publish(EngineEvent::AnswerReady {
            meta: EventMeta::new(SOURCE, request_id.clone()),
            refused: answer.refused,
            refusal_reason: answer.refusal_reason,
            citation_count: answer.citations.len(),
        });
        answer
    }
}

fn describe_tiers(tiers: &BTreeSet<Tier>) -> String {
    if tiers.is_empty() {
        return "no tiers".to_string();
    }
    tiers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StaticStore;

    fn state(queried: bool, rejected: bool, skipped: bool) -> RunState {
        let request = RetrievalRequest::realtime(&EngineConfig::default(), "s1", "q");
        RunState {
            controller: EscalationController::new(request.request_id.clone()),
            request: Arc::new(request),
            outcomes: Vec::new(),
            audited_drops: 0,
            escalation_queried: queried,
            escalation_rejected: rejected,
            escalation_skipped: skipped,
        }
    }

    #[test]
    fn test_fallback_reason_priority() {
        assert_eq!(
            state(true, true, true).fallback_reason(),
            RefusalReason::InsufficientEvidenceAfterEscalation
        );
        assert_eq!(
            state(false, true, true).fallback_reason(),
            RefusalReason::EscalationRejected
        );
        assert_eq!(
            state(false, false, true).fallback_reason(),
            RefusalReason::EscalationDenied
        );
        assert_eq!(
            state(false, false, false).fallback_reason(),
            RefusalReason::NoTiersAvailable
        );
    }

    #[test]
    fn test_describe_tiers() {
        assert_eq!(describe_tiers(&BTreeSet::new()), "no tiers");
        let tiers = BTreeSet::from([Tier::Documents, Tier::SessionMemory]);
        assert_eq!(
            describe_tiers(&tiers),
            format!("{}, {}", Tier::SessionMemory, Tier::Documents)
        );
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.min_coverage_threshold = 1.5;
        assert!(AnsweringEngine::builder(config).build().is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_request_is_noop() {
        let Ok(engine) = AnsweringEngine::builder(EngineConfig::default())
            .with_store(Arc::new(StaticStore::empty(Tier::SessionMemory)))
            .build()
        else {
            return;
        };
        assert!(!engine.cancel(&RequestId::new("nope")));
        assert_eq!(engine.cancel_handle().cancel_all(), 0);
        assert_eq!(engine.in_flight(), 0);
    }
}
