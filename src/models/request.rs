//! Retrieval requests.

use super::{RequestId, SessionId};
use crate::config::EngineConfig;
use crate::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How latency-sensitive a request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Live question during a session; tight budget, internal tiers first.
    #[default]
    Realtime,
    /// Offline question (minutes, study packs); even budget split.
    Batch,
}

impl RetrievalMode {
    /// Returns the mode as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Batch => "batch",
        }
    }

    /// Parses a mode string, defaulting to realtime.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "batch" | "offline" => Self::Batch,
            _ => Self::Realtime,
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incoming question.
///
/// Terminal once an answer or refusal has been produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// Request identifier.
    pub request_id: RequestId,
    /// Session the question was asked in.
    pub session_id: SessionId,
    /// The question.
    pub query_text: String,
    /// Latency class.
    pub mode: RetrievalMode,
    /// Total latency budget for tier queries.
    pub max_latency_ms: u64,
    /// Coverage score needed to answer without escalation.
    pub min_coverage_threshold: f32,
    /// Whether Tier 2 (web search) may be proposed.
    pub allow_web: bool,
    /// Whether Tier 3 (deep research) may be proposed.
    pub allow_deep_research: bool,
    /// Snapshot instant for session memory reads (Unix epoch milliseconds).
    pub issued_at_ms: u64,
}

impl RetrievalRequest {
    /// Creates a request from configuration defaults.
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        session_id: impl Into<SessionId>,
        query_text: impl Into<String>,
        mode: RetrievalMode,
    ) -> Self {
        let max_latency_ms = match mode {
            RetrievalMode::Realtime => config.max_latency_ms,
            RetrievalMode::Batch => config.batch_max_latency_ms,
        };
        Self {
            request_id: RequestId::generate(),
            session_id: session_id.into(),
            query_text: query_text.into(),
            mode,
            max_latency_ms,
            min_coverage_threshold: config.min_coverage_threshold,
            allow_web: false,
            allow_deep_research: false,
            issued_at_ms: current_timestamp_ms(),
        }
    }

    /// Creates a realtime request from configuration defaults.
    #[must_use]
    pub fn realtime(
        config: &EngineConfig,
        session_id: impl Into<SessionId>,
        query_text: impl Into<String>,
    ) -> Self {
        Self::new(config, session_id, query_text, RetrievalMode::Realtime)
    }

    /// Creates a batch request from configuration defaults.
    #[must_use]
    pub fn batch(
        config: &EngineConfig,
        session_id: impl Into<SessionId>,
        query_text: impl Into<String>,
    ) -> Self {
        Self::new(config, session_id, query_text, RetrievalMode::Batch)
    }

    /// Overrides the request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Permits web search escalation.
    #[must_use]
    pub const fn with_web(mut self, allow: bool) -> Self {
        self.allow_web = allow;
        self
    }

    /// Permits deep research escalation.
    #[must_use]
    pub const fn with_deep_research(mut self, allow: bool) -> Self {
        self.allow_deep_research = allow;
        self
    }

    /// Overrides the latency budget.
    #[must_use]
    pub const fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    /// Overrides the coverage threshold.
    #[must_use]
    pub const fn with_min_coverage_threshold(mut self, threshold: f32) -> Self {
        self.min_coverage_threshold = threshold;
        self
    }

    /// Overrides the snapshot instant.
    #[must_use]
    pub const fn with_issued_at_ms(mut self, issued_at_ms: u64) -> Self {
        self.issued_at_ms = issued_at_ms;
        self
    }

    /// Returns the latency budget as a duration.
    #[must_use]
    pub const fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }

    /// Returns true if any gated tier may be proposed.
    #[must_use]
    pub const fn allows_escalation(&self) -> bool {
        self.allow_web || self.allow_deep_research
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_takes_config_defaults() {
        let config = EngineConfig::default();
        let request = RetrievalRequest::realtime(&config, "s1", "what did we decide?");
        assert_eq!(request.max_latency_ms, config.max_latency_ms);
        assert!((request.min_coverage_threshold - config.min_coverage_threshold).abs() < f32::EPSILON);
        assert!(!request.allows_escalation());
        assert!(request.issued_at_ms > 0);

        let batch = RetrievalRequest::batch(&config, "s1", "q");
        assert_eq!(batch.max_latency_ms, config.batch_max_latency_ms);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default();
        let request = RetrievalRequest::realtime(&config, "s1", "q")
            .with_request_id("req-1")
            .with_web(true)
            .with_max_latency_ms(500);
        assert_eq!(request.request_id.as_str(), "req-1");
        assert!(request.allow_web);
        assert!(request.allows_escalation());
        assert_eq!(request.max_latency(), Duration::from_millis(500));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(RetrievalMode::parse("BATCH"), RetrievalMode::Batch);
        assert_eq!(RetrievalMode::parse("live"), RetrievalMode::Realtime);
    }
}
