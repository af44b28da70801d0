//! Tier 2 / Tier 3: JSON-over-HTTP search collaborators.
//!
//! The collaborator is queried with `GET {endpoint}?q=<query>&limit=<n>` and an
//! optional bearer token, and answers:
//!
//! ```json
//! {"results": [{"url": "https://...", "title": "...", "snippet": "...", "score": 0.82}]}
//! ```
//!
//! Results without a snippet are skipped. A missing score falls back to a
//! rank-based score (`1 / (1 + rank)`).

use super::EvidenceStore;
use crate::config::HttpSearchSettings;
use crate::models::{CostEstimate, EvidenceFragment, RetrievalRequest, SourceRef, Tier};
use crate::text::content_hash;
use crate::{Error, Result, current_timestamp_ms};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// HTTP search adapter for a gated tier.
pub struct HttpSearchStore {
    tier: Tier,
    name: String,
    endpoint: String,
    api_key: Option<SecretString>,
    max_results: usize,
    cost_per_query: f64,
    expected_latency_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

impl HttpSearchStore {
    /// Creates an adapter for a gated tier from settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a non-gated tier or an empty endpoint.
    pub fn new(tier: Tier, settings: &HttpSearchSettings) -> Result<Self> {
        if !tier.is_gated() {
            return Err(Error::InvalidInput(format!(
                "HTTP search serves gated tiers only, got {tier}"
            )));
        }
        if settings.endpoint.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} endpoint is empty",
                tier.as_str()
            )));
        }
        Ok(Self {
            tier,
            name: format!("http_{}", tier.as_str()),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            max_results: settings.max_results.max(1),
            cost_per_query: settings.cost_per_query,
            expected_latency_ms: settings.expected_latency_ms,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> Error {
        Error::TierUnavailable {
            tier: self.tier.number(),
            reason: reason.into(),
        }
    }

    /// Maps a parsed response to fragments.
    #[allow(clippy::cast_precision_loss)]
    fn to_fragments(&self, response: SearchResponse) -> Vec<EvidenceFragment> {
        let now = current_timestamp_ms();
        response
            .results
            .into_iter()
            .filter_map(|r| {
                let snippet = r.snippet.filter(|s| !s.trim().is_empty())?;
                (!r.url.trim().is_empty()).then_some((r.url, r.title, snippet, r.score))
            })
            .take(self.max_results)
            .enumerate()
            .map(|(rank, (url, title, snippet, score))| {
                let hash = content_hash(&url);
                let score = score.unwrap_or(1.0 / (1.0 + rank as f32));
                EvidenceFragment::new(
                    format!("t{}:{}", self.tier.number(), &hash[..12]),
                    self.tier,
                    SourceRef::Url { url, title },
                    snippet,
                    score,
                    now,
                )
            })
            .collect()
    }
}

impl EvidenceStore for HttpSearchStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, request: &RetrievalRequest, budget: Duration) -> Result<Vec<EvidenceFragment>> {
        // Built per call: the blocking client owns a runtime that must not be
        // dropped on an async worker thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(budget)
            .build()
            .map_err(|e| self.unavailable(format!("client build failed: {e}")))?;

        let limit = self.max_results.to_string();
        let mut builder = client
            .get(&self.endpoint)
            .query(&[("q", request.query_text.as_str()), ("limit", limit.as_str())]);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = builder
            .send()
            .map_err(|e| self.unavailable(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(self.unavailable(format!("search returned status {}", response.status())));
        }
        let parsed: SearchResponse = response
            .json()
            .map_err(|e| self.unavailable(format!("invalid response body: {e}")))?;

        Ok(self.to_fragments(parsed))
    }

    fn estimate_cost(&self, _request: &RetrievalRequest) -> Option<CostEstimate> {
        Some(CostEstimate {
            cost: self.cost_per_query,
            expected_latency_ms: self.expected_latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn settings() -> HttpSearchSettings {
        HttpSearchSettings {
            endpoint: "http://127.0.0.1:9/search/".to_string(),
            cost_per_query: 0.05,
            max_results: 2,
            ..HttpSearchSettings::default()
        }
    }

    #[test]
    fn test_only_gated_tiers_accepted() {
        assert!(HttpSearchStore::new(Tier::Documents, &settings()).is_err());
        assert!(HttpSearchStore::new(Tier::WebSearch, &HttpSearchSettings::default()).is_err());
        let store = HttpSearchStore::new(Tier::DeepResearch, &settings());
        assert!(store.is_ok());
    }

    #[test]
    fn test_response_mapping() {
        let Ok(store) = HttpSearchStore::new(Tier::WebSearch, &settings()) else {
            return;
        };
        let body = r#"{"results": [
            {"url": "https://a.example/x", "title": "A", "snippet": "Alpha fact", "score": 0.9},
            {"url": "https://b.example/y", "snippet": "  "},
            {"url": "https://c.example/z", "snippet": "Gamma fact"},
            {"url": "https://d.example/w", "snippet": "Delta fact"}
        ]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).unwrap_or(SearchResponse {
            results: Vec::new(),
        });
        let fragments = store.to_fragments(parsed);
        assert_eq!(fragments.len(), 2);
        assert!((fragments[0].score - 0.9).abs() < f32::EPSILON);
        assert!((fragments[1].score - 0.5).abs() < f32::EPSILON);
        assert!(fragments.iter().all(|f| f.tier == Tier::WebSearch));
        assert!(fragments[0].id.as_str().starts_with("t2:"));
    }

    #[test]
    fn test_estimate_cost_and_unreachable_endpoint() {
        let Ok(store) = HttpSearchStore::new(Tier::WebSearch, &settings()) else {
            return;
        };
        let request = RetrievalRequest::realtime(&EngineConfig::default(), "s", "q");
        let estimate = store.estimate_cost(&request);
        assert_eq!(estimate.map(|e| e.cost), Some(0.05));

        let result = store.query(&request, Duration::from_millis(200));
        assert!(matches!(result, Err(Error::TierUnavailable { tier: 2, .. })));
    }
}
