//! Session fixtures for the command line.
//!
//! A fixture is a JSON or YAML file describing one session: transcript lines,
//! visual events, recap windows, uploaded documents, and optionally canned web
//! or deep research hits so gated tiers can be exercised offline.
//!
//! ```yaml
//! session_id: standup
//! transcript:
//!   - { start_ms: 60000, end_ms: 65000, speaker: Ana, text: "We agreed the Q3 budget is 40k." }
//! documents:
//!   - { document_id: plan, title: Launch plan, text: "The launch moved to April." }
//! web:
//!   - { url: "https://example.org/q3", title: Q3 report, text: "...", score: 0.8 }
//! ```

use crate::config::EngineConfig;
use crate::embedding::{Embedder, HashedEmbedder};
use crate::models::{EvidenceFragment, SessionId, SourceRef, Tier};
use crate::storage::{
    DocumentIndex, DocumentInput, EvidenceStore, HttpSearchStore, ResilientStore,
    SessionMemoryStore, StaticStore,
};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Session id used when a fixture does not name one.
pub const DEFAULT_SESSION_ID: &str = "cli";

/// A transcript line.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptLine {
    /// Start offset in milliseconds.
    pub start_ms: u64,
    /// End offset in milliseconds.
    pub end_ms: u64,
    /// Speaker label.
    #[serde(default)]
    pub speaker: Option<String>,
    /// Spoken text.
    pub text: String,
}

/// A visual event.
#[derive(Debug, Clone, Deserialize)]
pub struct VisualEvent {
    /// Frame offset in milliseconds.
    pub timestamp_ms: u64,
    /// Event type (`slide_change`, `whiteboard`, ...).
    pub event_type: String,
    /// Extracted text.
    pub text: String,
}

/// A recap window.
#[derive(Debug, Clone, Deserialize)]
pub struct RecapWindow {
    /// Window start in milliseconds.
    pub start_ms: u64,
    /// Window end in milliseconds.
    pub end_ms: u64,
    /// Summary text.
    pub text: String,
}

/// An uploaded document.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureDocument {
    /// Document id.
    pub document_id: String,
    /// Title.
    #[serde(default)]
    pub title: Option<String>,
    /// Extracted text.
    pub text: String,
    /// Page number.
    #[serde(default)]
    pub page: Option<u32>,
    /// Shared hub document rather than a session upload.
    #[serde(default)]
    pub shared: bool,
}

/// A canned search hit for a gated tier.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureHit {
    /// Page URL.
    pub url: String,
    /// Page title.
    #[serde(default)]
    pub title: Option<String>,
    /// Snippet text.
    pub text: String,
    /// Tier-local score.
    #[serde(default = "default_hit_score")]
    pub score: f32,
}

const fn default_hit_score() -> f32 {
    0.5
}

/// One session's worth of evidence.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Session id.
    pub session_id: Option<String>,
    /// Transcript lines.
    pub transcript: Vec<TranscriptLine>,
    /// Visual events.
    pub visual_events: Vec<VisualEvent>,
    /// Recap windows.
    pub recaps: Vec<RecapWindow>,
    /// Documents.
    pub documents: Vec<FixtureDocument>,
    /// Canned web search hits.
    pub web: Vec<FixtureHit>,
    /// Canned deep research hits.
    pub deep_research: Vec<FixtureHit>,
    /// Cost reported for canned gated tiers.
    pub gated_cost: Option<f64>,
}

impl Fixture {
    /// Loads a fixture, choosing the parser by file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_fixture".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("yaml" | "yml") => Self::from_yaml(&contents),
            Some("json") => Self::from_json(&contents),
            _ => Self::from_json(&contents).or_else(|_| Self::from_yaml(&contents)),
        }
    }

    /// Parses a JSON fixture.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe a fixture.
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_fixture".to_string(),
            cause: format!("invalid JSON: {e}"),
        })
    }

    /// Parses a YAML fixture.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML does not describe a fixture.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml_ng::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_fixture".to_string(),
            cause: format!("invalid YAML: {e}"),
        })
    }

    /// The fixture's session id.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        SessionId::new(
            self.session_id
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_SESSION_ID),
        )
    }

    fn hits(&self, tier: Tier) -> &[FixtureHit] {
        match tier {
            Tier::WebSearch => &self.web,
            Tier::DeepResearch => &self.deep_research,
            Tier::SessionMemory | Tier::Documents => &[],
        }
    }

    fn canned_store(&self, tier: Tier) -> Option<StaticStore> {
        let hits = self.hits(tier);
        if hits.is_empty() {
            return None;
        }
        let fragments = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                EvidenceFragment::new(
                    format!("t{}:fixture:{i}", tier.number()),
                    tier,
                    SourceRef::Url {
                        url: hit.url.clone(),
                        title: hit.title.clone(),
                    },
                    hit.text.clone(),
                    hit.score,
                    0,
                )
            })
            .collect();
        let store = StaticStore::new(tier, fragments);
        Some(match self.gated_cost {
            Some(cost) => store.with_cost(cost, 0),
            None => store,
        })
    }
}

/// Builds one adapter per tier from a fixture and the configuration.
///
/// Session memory and documents come from the fixture. Gated tiers use the
/// fixture's canned hits when present, otherwise a configured HTTP search
/// collaborator behind a circuit breaker, otherwise nothing.
///
/// # Errors
///
/// Returns an error if fixture content is rejected by an adapter or an HTTP
/// collaborator is misconfigured.
pub fn build_stores(config: &EngineConfig, fixture: &Fixture) -> Result<Vec<Arc<dyn EvidenceStore>>> {
    let embedder: Arc<dyn Embedder> = Arc::new(HashedEmbedder::new());
    let session_id = fixture.session_id();

    let memory = SessionMemoryStore::new(Arc::clone(&embedder), config.session_memory.clone());
    for line in &fixture.transcript {
        memory.append_transcript(
            &session_id,
            line.start_ms,
            line.end_ms,
            line.speaker.as_deref(),
            line.text.clone(),
        )?;
    }
    for event in &fixture.visual_events {
        memory.append_visual_event(
            &session_id,
            event.timestamp_ms,
            event.event_type.clone(),
            event.text.clone(),
        )?;
    }
    for recap in &fixture.recaps {
        memory.append_recap(&session_id, recap.start_ms, recap.end_ms, recap.text.clone())?;
    }

    let documents = DocumentIndex::new(embedder, config.documents.clone());
    for doc in &fixture.documents {
        let passages = documents.add_document(DocumentInput {
            document_id: doc.document_id.clone(),
            title: doc.title.clone().unwrap_or_else(|| doc.document_id.clone()),
            session_id: (!doc.shared).then(|| session_id.clone()),
            text: doc.text.clone(),
            page: doc.page,
        })?;
        debug!(document_id = %doc.document_id, passages, "Indexed fixture document");
    }

    let mut stores: Vec<Arc<dyn EvidenceStore>> = vec![Arc::new(memory), Arc::new(documents)];

    for (tier, settings) in [
        (Tier::WebSearch, config.web_search.as_ref()),
        (Tier::DeepResearch, config.deep_research.as_ref()),
    ] {
        if let Some(store) = fixture.canned_store(tier) {
            stores.push(Arc::new(store));
        } else if let Some(settings) = settings {
            let store = HttpSearchStore::new(tier, settings)?;
            stores.push(Arc::new(ResilientStore::new(store, &config.resilience)));
        }
    }

    info!(
        session_id = %session_id,
        tiers = ?stores.iter().map(|s| s.tier()).collect::<Vec<_>>(),
        "Evidence stores ready"
    );
    Ok(stores)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r"
session_id: standup
transcript:
  - { start_ms: 60000, end_ms: 65000, speaker: Ana, text: 'We agreed the Q3 budget is 40k.' }
documents:
  - { document_id: plan, title: Launch plan, text: 'The launch moved to April.' }
web:
  - { url: 'https://example.org/q3', text: 'Q3 budgets rose.', score: 0.7 }
";

    #[test]
    fn test_yaml_fixture() {
        let fixture = Fixture::from_yaml(YAML).unwrap_or_default();
        assert_eq!(fixture.session_id(), SessionId::new("standup"));
        assert_eq!(fixture.transcript.len(), 1);
        assert_eq!(fixture.documents[0].document_id, "plan");
        assert!((fixture.web[0].score - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_json_fixture_defaults() {
        let fixture = Fixture::from_json(r#"{"web": [{"url": "https://a.example", "text": "x"}]}"#)
            .unwrap_or_default();
        assert_eq!(fixture.session_id().as_str(), DEFAULT_SESSION_ID);
        assert!((fixture.web[0].score - 0.5).abs() < f32::EPSILON);
        assert!(Fixture::from_json("not json").is_err());
    }

    #[test]
    fn test_build_stores_from_fixture() {
        let fixture = Fixture::from_yaml(YAML).unwrap_or_default();
        let stores = build_stores(&EngineConfig::default(), &fixture).unwrap_or_default();
        let tiers: Vec<Tier> = stores.iter().map(|s| s.tier()).collect();
        assert_eq!(
            tiers,
            vec![Tier::SessionMemory, Tier::Documents, Tier::WebSearch]
        );
    }

    #[test]
    fn test_load_by_extension() {
        let Ok(dir) = tempfile::tempdir() else {
            return;
        };
        let path = dir.path().join("session.yml");
        if std::fs::write(&path, YAML).is_err() {
            return;
        }
        let fixture = Fixture::load(&path).unwrap_or_default();
        assert_eq!(fixture.transcript.len(), 1);
        assert!(Fixture::load(&dir.path().join("missing.json")).is_err());
    }
}
