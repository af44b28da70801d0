//! Configuration sections for routing, ranking, approval and collaborators.
//!
//! Every section deserializes with `#[serde(default)]` so a config file only
//! needs to name the values it changes.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// Deserializes an optional plain string into a secret.
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|s| !s.trim().is_empty())
        .map(SecretString::from))
}

/// How the router splits a request's latency budget.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingPolicy {
    /// Share of a realtime budget given to Tier 0.
    pub realtime_tier0_share: f32,
    /// Share of a realtime budget given to Tier 1.
    pub realtime_tier1_share: f32,
    /// Share of a realtime budget given to a tier authorized by escalation.
    pub realtime_escalation_share: f32,
    /// Smallest useful budget for one tier; tiers below it are dropped.
    pub min_tier_budget_ms: u64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            realtime_tier0_share: 0.7,
            realtime_tier1_share: 0.3,
            realtime_escalation_share: 0.5,
            min_tier_budget_ms: 50,
        }
    }
}

/// Score normalization strategy for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizerKind {
    /// Clamp raw scores into `[0, 1]`.
    Clamp,
    /// Divide by the batch maximum.
    MaxScale,
    /// Logistic squashing around a midpoint.
    Logistic {
        /// Raw score mapped to `0.5`.
        midpoint: f32,
        /// Slope at the midpoint.
        steepness: f32,
    },
}

/// Ranking and deduplication parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankingPolicy {
    /// Tier priority weights, indexed by tier number.
    pub tier_weights: [f32; 4],
    /// Normalizer per tier, indexed by tier number.
    pub normalizers: [NormalizerKind; 4],
    /// Token Jaccard similarity above which same-document fragments collapse.
    pub dedup_similarity_threshold: f32,
    /// Half-life of session-memory recency decay.
    pub recency_half_life_ms: u64,
    /// How much recency can move a session-memory rank (`0.0..=1.0`).
    pub recency_influence: f32,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            tier_weights: [1.0, 0.9, 0.75, 0.6],
            normalizers: [
                NormalizerKind::Clamp,
                NormalizerKind::Clamp,
                NormalizerKind::Logistic {
                    midpoint: 0.5,
                    steepness: 8.0,
                },
                NormalizerKind::Logistic {
                    midpoint: 0.5,
                    steepness: 8.0,
                },
            ],
            dedup_similarity_threshold: 0.85,
            recency_half_life_ms: 10 * 60 * 1000,
            recency_influence: 0.3,
        }
    }
}

/// Claim criticality classifier settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaimPolicy {
    /// Extra regular expressions marking a claim critical.
    pub extra_critical_patterns: Vec<String>,
    /// Treat every claim as critical.
    pub all_claims_critical: bool,
}

/// Tier 0 adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionMemorySettings {
    /// Maximum fragments returned per query.
    pub max_results: usize,
    /// Minimum cosine score for a fragment to be returned.
    pub min_score: f32,
}

impl Default for SessionMemorySettings {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_score: 0.05,
        }
    }
}

/// Tier 1 adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentIndexSettings {
    /// Characters per chunk when raw text is indexed.
    pub chunk_max_chars: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    /// Weight of keyword containment in the hybrid score.
    pub keyword_weight: f32,
    /// Maximum fragments returned per query.
    pub max_results: usize,
    /// Minimum hybrid score for a fragment to be returned.
    pub min_score: f32,
}

impl Default for DocumentIndexSettings {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1200,
            chunk_overlap: 150,
            keyword_weight: 0.5,
            max_results: 10,
            min_score: 0.05,
        }
    }
}

/// Settings for an HTTP search collaborator (Tier 2 or Tier 3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSearchSettings {
    /// Search endpoint URL.
    pub endpoint: String,
    /// Bearer token, if the endpoint requires one.
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    /// Maximum results requested.
    pub max_results: usize,
    /// Cost charged per query.
    pub cost_per_query: f64,
    /// Typical latency of one query.
    pub expected_latency_ms: u64,
}

impl Default for HttpSearchSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            max_results: 5,
            cost_per_query: 0.0,
            expected_latency_ms: 2000,
        }
    }
}

/// Circuit breaker settings for adapters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
        }
    }
}

/// Audit recorder settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// JSON-lines file receiving every entry.
    pub file_path: Option<PathBuf>,
    /// Key for the per-request HMAC chain. Chaining is off without a key.
    #[serde(deserialize_with = "deserialize_secret")]
    pub hmac_key: Option<SecretString>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: String,
    /// `EnvFilter` directive, e.g. `info` or `groundline=debug`.
    pub filter: String,
    /// Optional log file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: "pretty".to_string(),
            filter: "warn".to_string(),
            file: None,
        }
    }
}

/// Answer generation backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// `extractive` (default) or `openai`.
    pub provider: String,
    /// Model name.
    pub model: Option<String>,
    /// API key; falls back to `OPENAI_API_KEY`.
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    /// Base URL for OpenAI-compatible servers.
    pub base_url: Option<String>,
    /// Request timeout.
    pub timeout_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "extractive".to_string(),
            model: None,
            api_key: None,
            base_url: None,
            timeout_ms: 20_000,
        }
    }
}
