//! Tier 0: live session memory.
//!
//! Transcript segments, visual events and recap windows are appended per
//! session. Each append publishes a new immutable snapshot (`Arc<Vec<_>>`), so a
//! query reads one consistent view without holding a lock while scoring, and
//! entries appended after the request was issued are invisible to it.

use super::EvidenceStore;
use crate::config::SessionMemorySettings;
use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{EvidenceFragment, RetrievalRequest, SessionId, SourceRef, Tier};
use crate::{Error, Result, current_timestamp_ms};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// One appended piece of session material.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Position in the session log.
    pub sequence: u64,
    /// Where the entry came from.
    pub source_ref: SourceRef,
    /// Entry text (transcript, OCR/description, recap summary).
    pub text: String,
    /// When the entry was appended (Unix epoch milliseconds).
    pub appended_at_ms: u64,
    embedding: Vec<f32>,
}

type Snapshot = Arc<Vec<Arc<SessionEntry>>>;

/// In-memory Tier 0 adapter.
pub struct SessionMemoryStore {
    embedder: Arc<dyn Embedder>,
    sessions: RwLock<HashMap<SessionId, Snapshot>>,
    settings: SessionMemorySettings,
}

impl SessionMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, settings: SessionMemorySettings) -> Self {
        Self {
            embedder,
            sessions: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Appends an entry with an explicit append time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty text or a source that is not
    /// session material, or an embedding error.
    pub fn append_at(
        &self,
        source_ref: SourceRef,
        text: impl Into<String>,
        appended_at_ms: u64,
    ) -> Result<u64> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("session entry text is empty".to_string()));
        }
        let session_id = match &source_ref {
            SourceRef::Transcript { session_id, .. }
            | SourceRef::VisualFrame { session_id, .. }
            | SourceRef::Recap { session_id, .. } => session_id.clone(),
            SourceRef::Document { .. } | SourceRef::Url { .. } => {
                return Err(Error::InvalidInput(format!(
                    "session memory only accepts session material, got {source_ref}"
                )));
            },
        };
        let embedding = self.embedder.embed(&text)?;

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let current = sessions.get(&session_id).cloned().unwrap_or_default();
        let sequence = current.len() as u64;
        let mut next: Vec<Arc<SessionEntry>> = current.as_ref().clone();
        next.push(Arc::new(SessionEntry {
            sequence,
            source_ref,
            text,
            appended_at_ms,
            embedding,
        }));
        sessions.insert(session_id, Arc::new(next));
        Ok(sequence)
    }

    /// Appends a transcript segment.
    ///
    /// # Errors
    ///
    /// See [`Self::append_at`].
    pub fn append_transcript(
        &self,
        session_id: &SessionId,
        start_ms: u64,
        end_ms: u64,
        speaker: Option<&str>,
        text: impl Into<String>,
    ) -> Result<u64> {
        self.append_at(
            SourceRef::Transcript {
                session_id: session_id.clone(),
                start_ms,
                end_ms,
                speaker: speaker.map(str::to_string),
            },
            text,
            current_timestamp_ms(),
        )
    }

    /// Appends a visual event (slide change, whiteboard OCR, detected object).
    ///
    /// # Errors
    ///
    /// See [`Self::append_at`].
    pub fn append_visual_event(
        &self,
        session_id: &SessionId,
        timestamp_ms: u64,
        event_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<u64> {
        self.append_at(
            SourceRef::VisualFrame {
                session_id: session_id.clone(),
                timestamp_ms,
                event_type: event_type.into(),
            },
            text,
            current_timestamp_ms(),
        )
    }

    /// Appends a recap window summary.
    ///
    /// # Errors
    ///
    /// See [`Self::append_at`].
    pub fn append_recap(
        &self,
        session_id: &SessionId,
        start_ms: u64,
        end_ms: u64,
        text: impl Into<String>,
    ) -> Result<u64> {
        self.append_at(
            SourceRef::Recap {
                session_id: session_id.clone(),
                start_ms,
                end_ms,
            },
            text,
            current_timestamp_ms(),
        )
    }

    /// Returns the current snapshot of a session.
    #[must_use]
    pub fn snapshot(&self, session_id: &SessionId) -> Arc<Vec<Arc<SessionEntry>>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops a session's material. Returns true if the session existed.
    pub fn end_session(&self, session_id: &SessionId) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }
}

impl EvidenceStore for SessionMemoryStore {
    fn tier(&self) -> Tier {
        Tier::SessionMemory
    }

    fn name(&self) -> &str {
        "session_memory"
    }

    fn query(&self, request: &RetrievalRequest, budget: Duration) -> Result<Vec<EvidenceFragment>> {
        let started = Instant::now();
        let snapshot = self.snapshot(&request.session_id);
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self
            .embedder
            .embed(&request.query_text)
            .map_err(|e| Error::TierUnavailable {
                tier: Tier::SessionMemory.number(),
                reason: e.to_string(),
            })?;

        let mut scored: Vec<(f32, &Arc<SessionEntry>)> = Vec::new();
        for entry in snapshot
            .iter()
            .filter(|e| e.appended_at_ms <= request.issued_at_ms)
        {
            if started.elapsed() >= budget {
                tracing::debug!(
                    request_id = %request.request_id,
                    scanned = scored.len(),
                    "Session memory scan cut off by budget"
                );
                break;
            }
            let score = cosine_similarity(&query_embedding, &entry.embedding).clamp(0.0, 1.0);
            if score > 0.0 && score >= self.settings.min_score {
                scored.push((score, entry));
            }
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.sequence.cmp(&b.1.sequence))
        });
        scored.truncate(self.settings.max_results);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| {
                EvidenceFragment::new(
                    format!("t0:{}:{}", request.session_id, entry.sequence),
                    Tier::SessionMemory,
                    entry.source_ref.clone(),
                    entry.text.clone(),
                    score,
                    entry.appended_at_ms,
                )
                .with_embedding_distance(1.0 - score)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embedding::HashedEmbedder;

    fn store() -> SessionMemoryStore {
        SessionMemoryStore::new(
            Arc::new(HashedEmbedder::new()),
            SessionMemorySettings::default(),
        )
    }

    #[test]
    fn test_query_scores_relevant_entries_first() {
        let store = store();
        let session = SessionId::new("standup");
        let _ = store.append_at(
            SourceRef::Transcript {
                session_id: session.clone(),
                start_ms: 0,
                end_ms: 5000,
                speaker: None,
            },
            "We approved the hiring budget for Q3",
            100,
        );
        let _ = store.append_at(
            SourceRef::VisualFrame {
                session_id: session.clone(),
                timestamp_ms: 6000,
                event_type: "slide_change".to_string(),
            },
            "Roadmap slide: mobile launch timeline",
            200,
        );

        let request = RetrievalRequest::realtime(&EngineConfig::default(), session, "hiring budget Q3")
            .with_issued_at_ms(1000);
        let fragments = store
            .query(&request, Duration::from_secs(1))
            .unwrap_or_default();
        assert!(!fragments.is_empty());
        assert_eq!(fragments[0].id.as_str(), "t0:standup:0");
        assert!(fragments[0].score > 0.5);
        assert!(fragments[0].embedding_distance.is_some());
        assert!(fragments.iter().all(|f| f.tier == Tier::SessionMemory));
    }

    #[test]
    fn test_entries_after_issue_time_are_invisible() {
        let store = store();
        let session = SessionId::new("s1");
        let source = SourceRef::Recap {
            session_id: session.clone(),
            start_ms: 0,
            end_ms: 60_000,
        };
        let _ = store.append_at(source, "budget approved", 5_000);

        let request = RetrievalRequest::realtime(&EngineConfig::default(), session, "budget approved")
            .with_issued_at_ms(4_000);
        let fragments = store
            .query(&request, Duration::from_secs(1))
            .unwrap_or_default();
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let store = store();
        let session = SessionId::new("s1");
        let _ = store.append_transcript(&session, 0, 1, None, "first point");
        let before = store.snapshot(&session);
        let _ = store.append_transcript(&session, 1, 2, None, "second point");
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot(&session).len(), 2);
    }

    #[test]
    fn test_rejects_non_session_sources() {
        let result = store().append_at(
            SourceRef::Url {
                url: "https://example.com".to_string(),
                title: None,
            },
            "text",
            0,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_end_session_clears_material() {
        let store = store();
        let session = SessionId::new("s1");
        let _ = store.append_recap(&session, 0, 10, "summary");
        assert!(store.end_session(&session));
        assert!(store.snapshot(&session).is_empty());
        assert!(!store.end_session(&session));
    }
}
