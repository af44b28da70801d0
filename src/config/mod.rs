//! Configuration management.
//!
//! Configuration is resolved in layers: built-in defaults, then a TOML file
//! (explicit path, `GROUNDLINE_CONFIG_PATH`, or the platform config dir), then
//! `GROUNDLINE_*` environment variables.

mod policy;

pub use policy::{
    AuditSettings, ClaimPolicy, DocumentIndexSettings, HttpSearchSettings, LlmSettings,
    LoggingSettings, NormalizerKind, RankingPolicy, ResilienceSettings, RoutingPolicy,
    SessionMemorySettings,
};

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration for the answering engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Coverage score needed to answer without escalation.
    pub min_coverage_threshold: f32,
    /// Default latency budget for realtime requests.
    pub max_latency_ms: u64,
    /// Default latency budget for batch requests.
    pub batch_max_latency_ms: u64,
    /// How long a realtime request waits for an approval decision.
    pub tier2_wait_timeout_ms: u64,
    /// How long a batch request waits for an approval decision.
    pub batch_approval_wait_ms: u64,
    /// Maximum fragments kept after ranking.
    pub max_fragments_per_answer: usize,
    /// Minimum support a critical claim needs from one fragment.
    pub critical_claim_relevance_floor: f32,
    /// Gated tiers whose estimated cost exceeds this are skipped.
    pub max_escalation_cost: Option<f64>,
    /// Budget split.
    pub routing: RoutingPolicy,
    /// Ranking and deduplication.
    pub ranking: RankingPolicy,
    /// Claim classifier.
    pub claims: ClaimPolicy,
    /// Tier 0 adapter.
    pub session_memory: SessionMemorySettings,
    /// Tier 1 adapter.
    pub documents: DocumentIndexSettings,
    /// Tier 2 collaborator, when configured.
    pub web_search: Option<HttpSearchSettings>,
    /// Tier 3 collaborator, when configured.
    pub deep_research: Option<HttpSearchSettings>,
    /// Adapter circuit breakers.
    pub resilience: ResilienceSettings,
    /// Audit recorder.
    pub audit: AuditSettings,
    /// Logging.
    pub logging: LoggingSettings,
    /// Answer generation backend.
    pub llm: LlmSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_coverage_threshold: 0.6,
            max_latency_ms: 4000,
            batch_max_latency_ms: 30_000,
            tier2_wait_timeout_ms: 30_000,
            batch_approval_wait_ms: 120_000,
            max_fragments_per_answer: 8,
            critical_claim_relevance_floor: 0.35,
            max_escalation_cost: None,
            routing: RoutingPolicy::default(),
            ranking: RankingPolicy::default(),
            claims: ClaimPolicy::default(),
            session_memory: SessionMemorySettings::default(),
            documents: DocumentIndexSettings::default(),
            web_search: None,
            deep_research: None,
            resilience: ResilienceSettings::default(),
            audit: AuditSettings::default(),
            logging: LoggingSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Coverage threshold.
    pub min_coverage_threshold: Option<f32>,
    /// Realtime latency budget.
    pub max_latency_ms: Option<u64>,
    /// Batch latency budget.
    pub batch_max_latency_ms: Option<u64>,
    /// Realtime approval wait.
    pub tier2_wait_timeout_ms: Option<u64>,
    /// Batch approval wait.
    pub batch_approval_wait_ms: Option<u64>,
    /// Fragment cap.
    pub max_fragments_per_answer: Option<usize>,
    /// Critical claim support floor.
    pub critical_claim_relevance_floor: Option<f32>,
    /// Escalation cost ceiling.
    pub max_escalation_cost: Option<f64>,
    /// Routing section.
    pub routing: Option<RoutingPolicy>,
    /// Ranking section.
    pub ranking: Option<RankingPolicy>,
    /// Claims section.
    pub claims: Option<ClaimPolicy>,
    /// Session memory section.
    pub session_memory: Option<SessionMemorySettings>,
    /// Documents section.
    pub documents: Option<DocumentIndexSettings>,
    /// Web search section.
    pub web_search: Option<HttpSearchSettings>,
    /// Deep research section.
    pub deep_research: Option<HttpSearchSettings>,
    /// Resilience section.
    pub resilience: Option<ResilienceSettings>,
    /// Audit section.
    pub audit: Option<AuditSettings>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
    /// LLM section.
    pub llm: Option<LlmSettings>,
}

/// Parses an environment variable, ignoring unset or malformed values.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`].
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Returns the default config file location, if a home directory exists.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| {
            dirs.config_dir()
                .join("groundline")
                .join("config.toml")
        })
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/groundline/` for Unix
    /// compatibility. Returns defaults if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("groundline").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("groundline")
                .join("config.toml"),
        ];

        for path in &candidates {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    },
                }
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(v) = file.min_coverage_threshold {
            config.min_coverage_threshold = v;
        }
        if let Some(v) = file.max_latency_ms {
            config.max_latency_ms = v;
        }
        if let Some(v) = file.batch_max_latency_ms {
            config.batch_max_latency_ms = v;
        }
        if let Some(v) = file.tier2_wait_timeout_ms {
            config.tier2_wait_timeout_ms = v;
        }
        if let Some(v) = file.batch_approval_wait_ms {
            config.batch_approval_wait_ms = v;
        }
        if let Some(v) = file.max_fragments_per_answer {
            config.max_fragments_per_answer = v;
        }
        if let Some(v) = file.critical_claim_relevance_floor {
            config.critical_claim_relevance_floor = v;
        }
        config.max_escalation_cost = file.max_escalation_cost;
        if let Some(v) = file.routing {
            config.routing = v;
        }
        if let Some(v) = file.ranking {
            config.ranking = v;
        }
        if let Some(v) = file.claims {
            config.claims = v;
        }
        if let Some(v) = file.session_memory {
            config.session_memory = v;
        }
        if let Some(v) = file.documents {
            config.documents = v;
        }
        config.web_search = file.web_search;
        config.deep_research = file.deep_research;
        if let Some(v) = file.resilience {
            config.resilience = v;
        }
        if let Some(v) = file.audit {
            config.audit = v;
        }
        if let Some(v) = file.logging {
            config.logging = v;
        }
        if let Some(v) = file.llm {
            config.llm = v;
        }

        config
    }

    /// Applies `GROUNDLINE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("GROUNDLINE_MIN_COVERAGE_THRESHOLD") {
            self.min_coverage_threshold = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_MAX_LATENCY_MS") {
            self.max_latency_ms = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_BATCH_MAX_LATENCY_MS") {
            self.batch_max_latency_ms = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_TIER2_WAIT_TIMEOUT_MS") {
            self.tier2_wait_timeout_ms = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_BATCH_APPROVAL_WAIT_MS") {
            self.batch_approval_wait_ms = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_MAX_FRAGMENTS_PER_ANSWER") {
            self.max_fragments_per_answer = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_CRITICAL_CLAIM_RELEVANCE_FLOOR") {
            self.critical_claim_relevance_floor = v;
        }
        if let Some(v) = env_parse("GROUNDLINE_MAX_ESCALATION_COST") {
            self.max_escalation_cost = Some(v);
        }
        if let Ok(v) = std::env::var("GROUNDLINE_WEB_SEARCH_ENDPOINT")
            && !v.trim().is_empty()
        {
            self.web_search.get_or_insert_with(HttpSearchSettings::default).endpoint = v;
        }
        if let Ok(v) = std::env::var("GROUNDLINE_WEB_SEARCH_API_KEY")
            && !v.trim().is_empty()
        {
            self.web_search.get_or_insert_with(HttpSearchSettings::default).api_key =
                Some(v.into());
        }
        if let Ok(v) = std::env::var("GROUNDLINE_DEEP_RESEARCH_ENDPOINT")
            && !v.trim().is_empty()
        {
            self.deep_research
                .get_or_insert_with(HttpSearchSettings::default)
                .endpoint = v;
        }
        if let Ok(v) = std::env::var("GROUNDLINE_AUDIT_FILE") {
            self.audit.file_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GROUNDLINE_AUDIT_HMAC_KEY")
            && !v.trim().is_empty()
        {
            self.audit.hmac_key = Some(v.into());
        }
        if let Ok(v) = std::env::var("GROUNDLINE_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Ok(v) = std::env::var("GROUNDLINE_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("GROUNDLINE_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("GROUNDLINE_LLM_MODEL") {
            self.llm.model = Some(v);
        }
        self
    }

    /// Checks every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::InvalidInput(format!(
                    "{name} must be within 0.0..=1.0, got {v}"
                )))
            }
        };

        unit("min_coverage_threshold", self.min_coverage_threshold)?;
        unit(
            "critical_claim_relevance_floor",
            self.critical_claim_relevance_floor,
        )?;
        unit(
            "ranking.dedup_similarity_threshold",
            self.ranking.dedup_similarity_threshold,
        )?;
        unit("ranking.recency_influence", self.ranking.recency_influence)?;
        unit("documents.keyword_weight", self.documents.keyword_weight)?;
        unit("routing.realtime_tier0_share", self.routing.realtime_tier0_share)?;
        unit("routing.realtime_tier1_share", self.routing.realtime_tier1_share)?;
        unit(
            "routing.realtime_escalation_share",
            self.routing.realtime_escalation_share,
        )?;

        if self.routing.realtime_tier0_share + self.routing.realtime_tier1_share > 1.0 + f32::EPSILON
        {
            return Err(Error::InvalidInput(
                "routing.realtime_tier0_share + realtime_tier1_share must not exceed 1.0"
                    .to_string(),
            ));
        }
        if self.max_latency_ms == 0 || self.batch_max_latency_ms == 0 {
            return Err(Error::InvalidInput(
                "latency budgets must be positive".to_string(),
            ));
        }
        if self.max_fragments_per_answer == 0 {
            return Err(Error::InvalidInput(
                "max_fragments_per_answer must be at least 1".to_string(),
            ));
        }
        if self
            .ranking
            .tier_weights
            .iter()
            .any(|w| !w.is_finite() || *w <= 0.0)
        {
            return Err(Error::InvalidInput(
                "ranking.tier_weights must be positive".to_string(),
            ));
        }
        if self.ranking.recency_half_life_ms == 0 {
            return Err(Error::InvalidInput(
                "ranking.recency_half_life_ms must be positive".to_string(),
            ));
        }
        if self.documents.chunk_max_chars == 0 {
            return Err(Error::InvalidInput(
                "documents.chunk_max_chars must be positive".to_string(),
            ));
        }
        if let Some(cost) = self.max_escalation_cost
            && (!cost.is_finite() || cost < 0.0)
        {
            return Err(Error::InvalidInput(
                "max_escalation_cost must be a non-negative number".to_string(),
            ));
        }
        for (name, search) in [
            ("web_search", &self.web_search),
            ("deep_research", &self.deep_research),
        ] {
            if let Some(search) = search
                && search.endpoint.trim().is_empty()
            {
                return Err(Error::InvalidInput(format!(
                    "{name}.endpoint must be set when the section is present"
                )));
            }
        }
        Ok(())
    }

    /// Sets the coverage threshold.
    #[must_use]
    pub const fn with_min_coverage_threshold(mut self, threshold: f32) -> Self {
        self.min_coverage_threshold = threshold;
        self
    }

    /// Sets the realtime latency budget.
    #[must_use]
    pub const fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.max_latency_ms = max_latency_ms;
        self
    }

    /// Sets the realtime approval wait.
    #[must_use]
    pub const fn with_tier2_wait_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.tier2_wait_timeout_ms = timeout_ms;
        self
    }

    /// Sets the batch approval wait.
    #[must_use]
    pub const fn with_batch_approval_wait_ms(mut self, timeout_ms: u64) -> Self {
        self.batch_approval_wait_ms = timeout_ms;
        self
    }

    /// Sets the fragment cap.
    #[must_use]
    pub const fn with_max_fragments_per_answer(mut self, max: usize) -> Self {
        self.max_fragments_per_answer = max;
        self
    }

    /// Sets the escalation cost ceiling.
    #[must_use]
    pub const fn with_max_escalation_cost(mut self, cost: Option<f64>) -> Self {
        self.max_escalation_cost = cost;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.min_coverage_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.max_fragments_per_answer, 8);
        assert!(config.web_search.is_none());
    }

    #[test]
    fn test_partial_toml_merges_over_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
min_coverage_threshold = 0.7
tier2_wait_timeout_ms = 1500

[ranking]
recency_influence = 0.5

[web_search]
endpoint = "https://search.internal/api"
api_key = "sk-test"
cost_per_query = 0.02
"#,
        );
        assert!(config.is_ok());
        let config = config.unwrap_or_default();
        assert!((config.min_coverage_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.tier2_wait_timeout_ms, 1500);
        assert!((config.ranking.recency_influence - 0.5).abs() < f32::EPSILON);
        assert!((config.ranking.dedup_similarity_threshold - 0.85).abs() < f32::EPSILON);
        let web = config.web_search.unwrap_or_default();
        assert_eq!(web.endpoint, "https://search.internal/api");
        assert!(web.api_key.is_some());
        assert_eq!(web.max_results, 5);
    }

    #[test]
    fn test_normalizer_sections_parse() {
        let config = EngineConfig::from_toml_str(
            r#"
[ranking]
normalizers = [
  { kind = "clamp" },
  { kind = "max_scale" },
  { kind = "logistic", midpoint = 0.4, steepness = 6.0 },
  { kind = "clamp" },
]
"#,
        )
        .unwrap_or_default();
        assert_eq!(config.ranking.normalizers[1], NormalizerKind::MaxScale);
        assert_eq!(
            config.ranking.normalizers[2],
            NormalizerKind::Logistic {
                midpoint: 0.4,
                steepness: 6.0
            }
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = EngineConfig::default().with_min_coverage_threshold(1.5);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));

        let config = EngineConfig::default().with_max_fragments_per_answer(0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.web_search = Some(HttpSearchSettings::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let result = EngineConfig::from_toml_str("min_coverage_threshold = \"high\"");
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }
}
