//! Ask command: answer one question against a session fixture.

use crate::config::EngineConfig;
use crate::models::{GroundedAnswer, ProposalStatus, RetrievalMode, RetrievalRequest, SessionId, ToolProposal};
use crate::security::AuditEntry;
use crate::services::AnsweringEngine;
use crate::{Error, Result};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Options of one `ask` invocation.
#[derive(Debug, Clone, Default)]
pub struct AskCommand {
    /// The question.
    pub query: String,
    /// Session override; the fixture's session otherwise.
    pub session_id: Option<String>,
    /// Realtime or batch.
    pub mode: RetrievalMode,
    /// Permit web search escalation.
    pub allow_web: bool,
    /// Permit deep research escalation.
    pub allow_deep_research: bool,
    /// Coverage threshold override.
    pub threshold: Option<f32>,
    /// Latency budget override.
    pub max_latency_ms: Option<u64>,
}

impl AskCommand {
    /// Builds the retrieval request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty question or a threshold
    /// outside `0.0..=1.0`.
    pub fn to_request(&self, config: &EngineConfig, default_session: &SessionId) -> Result<RetrievalRequest> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidInput("question is empty".to_string()));
        }
        let session = self
            .session_id
            .as_deref()
            .map_or_else(|| default_session.clone(), SessionId::new);

        let mut request = RetrievalRequest::new(config, session, self.query.trim(), self.mode)
            .with_web(self.allow_web)
            .with_deep_research(self.allow_deep_research);
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::InvalidInput(format!(
                    "threshold must be within 0.0..=1.0, got {threshold}"
                )));
            }
            request = request.with_min_coverage_threshold(threshold);
        }
        if let Some(ms) = self.max_latency_ms {
            request = request.with_max_latency_ms(ms);
        }
        Ok(request)
    }
}

/// Output format for answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format name, defaulting to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Renders an answer.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_answer(answer: &GroundedAnswer, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(answer).map_err(|e| Error::OperationFailed {
            operation: "render_answer".to_string(),
            cause: e.to_string(),
        }),
        OutputFormat::Text => {
            let mut out = String::new();
            if answer.refused {
                let reason = answer
                    .refusal_reason
                    .map_or("unknown", |r| r.as_str());
                let _ = writeln!(out, "Refused ({reason}): {}", answer.answer_text);
            } else {
                let _ = writeln!(out, "{}", answer.answer_text);
            }
            if !answer.sources.is_empty() {
                let _ = writeln!(out, "\nSources:");
                for (i, source) in answer.sources.iter().enumerate() {
                    let _ = writeln!(out, "  [{}] {} ({})", i + 1, source.locator, source.tier);
                }
            }
            if !answer.unsupported_claims.is_empty() {
                let _ = writeln!(out, "\nWithheld (unsupported):");
                for claim in &answer.unsupported_claims {
                    let _ = writeln!(out, "  - {claim}");
                }
            }
            if !answer.tiers_consulted.is_empty() {
                let tiers: Vec<String> = answer
                    .tiers_consulted
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                let _ = writeln!(out, "\nTiers consulted: {}", tiers.join(", "));
            }
            Ok(out)
        },
    }
}

/// Renders an audit trail, one entry per line.
#[must_use]
pub fn render_trail(entries: &[AuditEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let tier = entry
            .tier
            .map_or_else(String::new, |t| format!(" [{t}]"));
        let _ = writeln!(
            out,
            "{:>3} {} {}{tier} {}",
            entry.sequence,
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.event_type,
            entry.payload_summary
        );
    }
    out
}

/// Answers proposals as they arrive.
///
/// `decide` runs on the blocking pool, so it may read from a terminal. `None`
/// leaves the proposal undecided; it then expires.
pub fn spawn_decider<F>(
    engine: Arc<AnsweringEngine>,
    mut proposals: mpsc::Receiver<ToolProposal>,
    decided_by: impl Into<String>,
    decide: F,
) -> JoinHandle<()>
where
    F: Fn(&ToolProposal) -> Option<ProposalStatus> + Send + Sync + 'static,
{
    let decided_by = decided_by.into();
    let decide = Arc::new(decide);
    tokio::spawn(async move {
        while let Some(proposal) = proposals.recv().await {
            let decide = Arc::clone(&decide);
            let pending = proposal.clone();
            let status = match tokio::task::spawn_blocking(move || decide(&pending)).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(error = %e, "Approval prompt failed");
                    None
                },
            };
            if let Some(status) = status {
                let ack = engine.on_decision(&proposal.proposal_id, status, &decided_by);
                debug!(proposal_id = %proposal.proposal_id, ?ack, "Decision submitted");
            }
        }
    })
}
