//! Config CLI command.

use crate::config::{EngineConfig, HttpSearchSettings};
use crate::models::Tier;
use std::fmt::Write as _;

/// Renders the effective configuration. Secrets are never printed.
#[must_use]
pub fn render_config(config: &EngineConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Effective Configuration");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out);
    let _ = writeln!(out, "Coverage threshold: {:.2}", config.min_coverage_threshold);
    let _ = writeln!(out, "Realtime latency budget: {} ms", config.max_latency_ms);
    let _ = writeln!(out, "Batch latency budget: {} ms", config.batch_max_latency_ms);
    let _ = writeln!(out, "Approval wait (realtime): {} ms", config.tier2_wait_timeout_ms);
    let _ = writeln!(out, "Approval wait (batch): {} ms", config.batch_approval_wait_ms);
    let _ = writeln!(out, "Max fragments per answer: {}", config.max_fragments_per_answer);
    let _ = writeln!(
        out,
        "Critical claim relevance floor: {:.2}",
        config.critical_claim_relevance_floor
    );
    let _ = writeln!(
        out,
        "Max escalation cost: {}",
        config
            .max_escalation_cost
            .map_or_else(|| "(unlimited)".to_string(), |c| format!("{c:.4}"))
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "Routing:");
    let _ = writeln!(out, "  Tier 0 share: {:.2}", config.routing.realtime_tier0_share);
    let _ = writeln!(out, "  Tier 1 share: {:.2}", config.routing.realtime_tier1_share);
    let _ = writeln!(
        out,
        "  Escalation share: {:.2}",
        config.routing.realtime_escalation_share
    );
    let _ = writeln!(out, "  Min tier budget: {} ms", config.routing.min_tier_budget_ms);

    let _ = writeln!(out);
    let _ = writeln!(out, "Ranking:");
    for tier in Tier::ALL {
        let _ = writeln!(
            out,
            "  {tier}: weight {:.2}, normalizer {:?}",
            config.ranking.tier_weights[tier.index()],
            config.ranking.normalizers[tier.index()]
        );
    }
    let _ = writeln!(
        out,
        "  Dedup similarity: {:.2}",
        config.ranking.dedup_similarity_threshold
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "Gated tiers:");
    let _ = writeln!(out, "  Web search: {}", describe_search(config.web_search.as_ref()));
    let _ = writeln!(
        out,
        "  Deep research: {}",
        describe_search(config.deep_research.as_ref())
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "Audit:");
    let _ = writeln!(
        out,
        "  File: {}",
        config
            .audit
            .file_path
            .as_ref()
            .map_or_else(|| "(memory only)".to_string(), |p| p.display().to_string())
    );
    let _ = writeln!(
        out,
        "  HMAC signing: {}",
        if config.audit.hmac_key.is_some() { "enabled" } else { "disabled" }
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "LLM:");
    let provider = if config.llm.provider.is_empty() {
        "extractive"
    } else {
        config.llm.provider.as_str()
    };
    let _ = writeln!(out, "  Provider: {provider}");
    let _ = writeln!(out, "  Model: {}", config.llm.model.as_deref().unwrap_or("(default)"));
    let _ = writeln!(
        out,
        "  Base URL: {}",
        config.llm.base_url.as_deref().unwrap_or("(default)")
    );
    out
}

fn describe_search(settings: Option<&HttpSearchSettings>) -> String {
    settings.map_or_else(
        || "(not configured)".to_string(),
        |s| {
            format!(
                "{} (max {} results, cost {:.4}, key {})",
                s.endpoint,
                s.max_results,
                s.cost_per_query,
                if s.api_key.is_some() { "set" } else { "unset" }
            )
        },
    )
}
