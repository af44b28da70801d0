//! Answer draft generation.
//!
//! A generator turns the query and the ranked evidence into draft claims, each
//! pointing at the fragments it relies on. Drafts are proposals only; the
//! assembler decides what is actually supported.

use super::{LlmProvider, OpenAiClient, extract_json_from_response};
use crate::config::LlmSettings;
use crate::models::{EvidenceFragment, FragmentId};
use crate::text;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::warn;

/// One proposed claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftClaim {
    /// Claim sentence.
    pub text: String,
    /// Fragments the claim says it relies on.
    pub citations: Vec<FragmentId>,
}

impl DraftClaim {
    /// Creates a claim.
    #[must_use]
    pub fn new(text: impl Into<String>, citations: Vec<FragmentId>) -> Self {
        Self {
            text: text.into(),
            citations,
        }
    }
}

/// A generator's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftAnswer {
    /// Claims in answer order.
    pub claims: Vec<DraftClaim>,
}

/// Backend that drafts answers from evidence.
pub trait AnswerGenerator: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Drafts claims answering `query` from `evidence` (best first).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn draft(&self, query: &str, evidence: &[Arc<EvidenceFragment>]) -> Result<DraftAnswer>;
}

/// Picks the evidence sentences that best overlap the query.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveGenerator {
    max_claims: usize,
}

impl ExtractiveGenerator {
    /// Default number of sentences per answer.
    pub const DEFAULT_MAX_CLAIMS: usize = 3;

    /// Creates a generator.
    #[must_use]
    pub const fn new(max_claims: usize) -> Self {
        Self { max_claims }
    }
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CLAIMS)
    }
}

impl AnswerGenerator for ExtractiveGenerator {
    fn name(&self) -> &'static str {
        "extractive"
    }

    fn draft(&self, query: &str, evidence: &[Arc<EvidenceFragment>]) -> Result<DraftAnswer> {
        let query_tokens = text::token_set(query);
        let mut candidates: Vec<(f32, usize, String, &FragmentId)> = Vec::new();
        let mut seen = HashSet::new();

        for (rank, fragment) in evidence.iter().enumerate() {
            for sentence in text::split_sentences(&fragment.text) {
                let overlap = text::containment(&query_tokens, &text::token_set(sentence));
                if overlap > 0.0 && seen.insert(text::normalize(sentence)) {
                    candidates.push((overlap, rank, sentence.to_string(), &fragment.id));
                }
            }
        }

        // Highest overlap first; rank order among equals.
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        candidates.truncate(self.max_claims.max(1));
        // Present in evidence order.
        candidates.sort_by_key(|c| c.1);

        // Nothing overlapping the question means nothing to say.
        let claims = candidates
            .into_iter()
            .map(|(_, _, sentence, id)| DraftClaim::new(sentence, vec![id.clone()]))
            .collect();

        Ok(DraftAnswer { claims })
    }
}

/// System prompt for LLM-backed drafting.
pub const GROUNDED_ANSWER_PROMPT: &str = r#"You answer questions about a live meeting or study session.
Use ONLY the numbered evidence provided. Never use outside knowledge.
Every claim must cite the evidence numbers it relies on.
If the evidence does not answer the question, return no claims and set "insufficient" to true.
Respond only with JSON:
{"claims": [{"text": "<one sentence>", "evidence": [1, 2]}], "insufficient": false}"#;

#[derive(Debug, Deserialize)]
struct LlmDraft {
    #[serde(default)]
    claims: Vec<LlmClaim>,
    #[serde(default)]
    insufficient: bool,
}

#[derive(Debug, Deserialize)]
struct LlmClaim {
    text: String,
    #[serde(default)]
    evidence: Vec<usize>,
}

/// Drafts with an LLM; falls back to extraction when the LLM fails.
pub struct LlmAnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    fallback: ExtractiveGenerator,
}

impl LlmAnswerGenerator {
    /// Creates a generator over a provider.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            fallback: ExtractiveGenerator::default(),
        }
    }

    fn user_prompt(query: &str, evidence: &[Arc<EvidenceFragment>]) -> String {
        let mut prompt = String::from("Evidence:\n");
        for (i, fragment) in evidence.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "[{}] ({}) {}",
                i + 1,
                fragment.source_ref,
                fragment.text.trim()
            );
        }
        let _ = write!(prompt, "\nQuestion: {query}");
        prompt
    }

    fn parse(response: &str, evidence: &[Arc<EvidenceFragment>]) -> Result<DraftAnswer> {
        let draft: LlmDraft =
            serde_json::from_str(extract_json_from_response(response)).map_err(|e| {
                Error::OperationFailed {
                    operation: "parse_grounded_draft".to_string(),
                    cause: format!("Invalid JSON: {e}"),
                }
            })?;
        if draft.insufficient && draft.claims.is_empty() {
            return Ok(DraftAnswer::default());
        }

        let claims = draft
            .claims
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .map(|c| {
                let citations = c
                    .evidence
                    .iter()
                    .filter_map(|n| n.checked_sub(1).and_then(|i| evidence.get(i)))
                    .map(|f| f.id.clone())
                    .collect();
                DraftClaim::new(c.text.trim(), citations)
            })
            .collect();
        Ok(DraftAnswer { claims })
    }
}

impl AnswerGenerator for LlmAnswerGenerator {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn draft(&self, query: &str, evidence: &[Arc<EvidenceFragment>]) -> Result<DraftAnswer> {
        if evidence.is_empty() {
            return Ok(DraftAnswer::default());
        }
        let response = self
            .provider
            .complete_with_system(GROUNDED_ANSWER_PROMPT, &Self::user_prompt(query, evidence))
            .and_then(|response| Self::parse(&response, evidence));

        match response {
            Ok(draft) => Ok(draft),
            Err(e) => {
                warn!(
                    provider = self.provider.name(),
                    error = %e,
                    "LLM drafting failed, falling back to extraction"
                );
                metrics::counter!("groundline_llm_fallback_total").increment(1);
                self.fallback.draft(query, evidence)
            },
        }
    }
}

/// Builds the configured generator.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an unknown provider.
pub fn generator_from_settings(settings: &LlmSettings) -> Result<Arc<dyn AnswerGenerator>> {
    match settings.provider.trim().to_lowercase().as_str() {
        "" | "extractive" | "none" => Ok(Arc::new(ExtractiveGenerator::default())),
        "openai" => Ok(Arc::new(LlmAnswerGenerator::new(Arc::new(
            OpenAiClient::from_settings(settings),
        )))),
        other => Err(Error::InvalidInput(format!(
            "unknown llm provider '{other}' (expected 'extractive' or 'openai')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceRef, Tier};

    fn fragment(id: &str, text: &str) -> Arc<EvidenceFragment> {
        Arc::new(EvidenceFragment::new(
            id,
            Tier::Documents,
            SourceRef::Document {
                document_id: "d1".to_string(),
                title: "Plan".to_string(),
                chunk_index: 0,
                page: None,
            },
            text,
            0.8,
            0,
        ))
    }

    struct CannedProvider(Result<String>);

    impl LlmProvider for CannedProvider {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(Error::OperationFailed {
                    operation: "complete".to_string(),
                    cause: e.to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_extractive_picks_overlapping_sentences() {
        let evidence = vec![
            fragment("a", "The launch moved to April. Lunch was pizza."),
            fragment("b", "Marketing owns the launch checklist."),
        ];
        let draft = ExtractiveGenerator::default()
            .draft("When is the launch?", &evidence)
            .unwrap_or_default();
        let texts: Vec<&str> = draft.claims.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["The launch moved to April.", "Marketing owns the launch checklist."]
        );
        assert_eq!(draft.claims[0].citations, vec![FragmentId::new("a")]);
    }

    #[test]
    fn test_extractive_without_overlap_proposes_nothing() {
        let evidence = vec![fragment("a", "Budget is 40k. Approved Monday.")];
        let draft = ExtractiveGenerator::default()
            .draft("xyzzy", &evidence)
            .unwrap_or_default();
        assert!(draft.claims.is_empty());
        assert!(
            ExtractiveGenerator::default()
                .draft("q", &[])
                .unwrap_or_default()
                .claims
                .is_empty()
        );
    }

    #[test]
    fn test_llm_draft_maps_evidence_numbers() {
        let provider = CannedProvider(Ok(
            r#"```json
{"claims": [{"text": "Launch is in April.", "evidence": [1, 7, 0]}], "insufficient": false}
```"#
                .to_string(),
        ));
        let generator = LlmAnswerGenerator::new(Arc::new(provider));
        let draft = generator
            .draft("When is the launch?", &[fragment("a", "The launch moved to April.")])
            .unwrap_or_default();
        assert_eq!(draft.claims.len(), 1);
        assert_eq!(draft.claims[0].citations, vec![FragmentId::new("a")]);
    }

    #[test]
    fn test_llm_insufficient_yields_no_claims() {
        let provider = CannedProvider(Ok(r#"{"claims": [], "insufficient": true}"#.to_string()));
        let generator = LlmAnswerGenerator::new(Arc::new(provider));
        let draft = generator
            .draft("q", &[fragment("a", "unrelated")])
            .unwrap_or_default();
        assert!(draft.claims.is_empty());
    }

    #[test]
    fn test_llm_failure_falls_back_to_extraction() {
        let provider = CannedProvider(Err(Error::InvalidInput("down".to_string())));
        let generator = LlmAnswerGenerator::new(Arc::new(provider));
        let draft = generator
            .draft("launch", &[fragment("a", "The launch moved to April.")])
            .unwrap_or_default();
        assert_eq!(draft.claims.len(), 1);
    }

    #[test]
    fn test_generator_from_settings() {
        let extractive = generator_from_settings(&LlmSettings::default());
        assert_eq!(extractive.map(|g| g.name()).ok(), Some("extractive"));

        let unknown = LlmSettings {
            provider: "mystery".to_string(),
            ..LlmSettings::default()
        };
        assert!(generator_from_settings(&unknown).is_err());
    }
}
