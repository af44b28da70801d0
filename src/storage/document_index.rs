//! Tier 1: uploaded documents.
//!
//! Passages are indexed in memory with both a token set and an embedding.
//! Scoring is hybrid: keyword containment of the query in the passage, blended
//! with vector cosine by `keyword_weight`.

use super::EvidenceStore;
use crate::config::DocumentIndexSettings;
use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{EvidenceFragment, RetrievalRequest, SessionId, SourceRef, Tier};
use crate::text::{chunk_text, containment, token_set};
use crate::{Error, Result, current_timestamp_ms};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// A document handed to the index.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Document identifier.
    pub document_id: String,
    /// Display title.
    pub title: String,
    /// Session the document was uploaded to; `None` for the shared hub.
    pub session_id: Option<SessionId>,
    /// Extracted text.
    pub text: String,
    /// Page number, when the whole input is one page.
    pub page: Option<u32>,
}

#[derive(Debug)]
struct Passage {
    document_id: String,
    title: String,
    chunk_index: usize,
    page: Option<u32>,
    session_id: Option<SessionId>,
    text: String,
    tokens: HashSet<String>,
    embedding: Vec<f32>,
    added_at_ms: u64,
}

/// In-memory Tier 1 adapter.
pub struct DocumentIndex {
    embedder: Arc<dyn Embedder>,
    passages: RwLock<Vec<Arc<Passage>>>,
    settings: DocumentIndexSettings,
}

impl DocumentIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, settings: DocumentIndexSettings) -> Self {
        Self {
            embedder,
            passages: RwLock::new(Vec::new()),
            settings,
        }
    }

    /// Chunks and indexes raw document text. Returns the number of passages.
    ///
    /// Re-adding a document id replaces its passages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank id or text without content.
    pub fn add_document(&self, document: DocumentInput) -> Result<usize> {
        let chunks = chunk_text(
            &document.text,
            self.settings.chunk_max_chars,
            self.settings.chunk_overlap,
        );
        self.add_passages(document, chunks)
    }

    /// Indexes a document that was already chunked upstream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank id or no non-empty chunks.
    pub fn add_passages(&self, document: DocumentInput, chunks: Vec<String>) -> Result<usize> {
        if document.document_id.trim().is_empty() {
            return Err(Error::InvalidInput("document id is empty".to_string()));
        }
        let now = current_timestamp_ms();
        let mut built = Vec::with_capacity(chunks.len());
        for (chunk_index, chunk) in chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .enumerate()
        {
            let embedding = self.embedder.embed(&chunk)?;
            built.push(Arc::new(Passage {
                document_id: document.document_id.clone(),
                title: document.title.clone(),
                chunk_index,
                page: document.page,
                session_id: document.session_id.clone(),
                tokens: token_set(&chunk),
                text: chunk,
                embedding,
                added_at_ms: now,
            }));
        }
        if built.is_empty() {
            return Err(Error::InvalidInput(format!(
                "document '{}' has no text to index",
                document.document_id
            )));
        }

        let count = built.len();
        let mut passages = self
            .passages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        passages.retain(|p| p.document_id != document.document_id);
        passages.extend(built);
        tracing::debug!(document_id = %document.document_id, passages = count, "Indexed document");
        Ok(count)
    }

    /// Removes a document. Returns the number of passages removed.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut passages = self
            .passages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = passages.len();
        passages.retain(|p| p.document_id != document_id);
        before - passages.len()
    }

    /// Number of indexed passages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.passages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvidenceStore for DocumentIndex {
    fn tier(&self) -> Tier {
        Tier::Documents
    }

    fn name(&self) -> &str {
        "document_index"
    }

    fn query(&self, request: &RetrievalRequest, budget: Duration) -> Result<Vec<EvidenceFragment>> {
        let started = Instant::now();
        let passages: Vec<Arc<Passage>> = self
            .passages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| {
                p.session_id
                    .as_ref()
                    .is_none_or(|s| *s == request.session_id)
            })
            .cloned()
            .collect();
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let query_tokens = token_set(&request.query_text);
        let query_embedding = self
            .embedder
            .embed(&request.query_text)
            .map_err(|e| Error::TierUnavailable {
                tier: Tier::Documents.number(),
                reason: e.to_string(),
            })?;
        let weight = self.settings.keyword_weight;

        let mut scored = Vec::new();
        for passage in &passages {
            if started.elapsed() >= budget {
                break;
            }
            let keyword = containment(&query_tokens, &passage.tokens);
            let vector = cosine_similarity(&query_embedding, &passage.embedding).max(0.0);
            let score = weight.mul_add(keyword, (1.0 - weight) * vector);
            if score > 0.0 && score >= self.settings.min_score {
                scored.push((score, vector, passage));
            }
        }

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.2.document_id.cmp(&b.2.document_id))
                .then_with(|| a.2.chunk_index.cmp(&b.2.chunk_index))
        });
        scored.truncate(self.settings.max_results);

        Ok(scored
            .into_iter()
            .map(|(score, vector, passage)| {
                EvidenceFragment::new(
                    format!("t1:{}:{}", passage.document_id, passage.chunk_index),
                    Tier::Documents,
                    SourceRef::Document {
                        document_id: passage.document_id.clone(),
                        title: passage.title.clone(),
                        chunk_index: passage.chunk_index,
                        page: passage.page,
                    },
                    passage.text.clone(),
                    score,
                    passage.added_at_ms,
                )
                .with_embedding_distance(1.0 - vector)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embedding::HashedEmbedder;

    fn index() -> DocumentIndex {
        DocumentIndex::new(
            Arc::new(HashedEmbedder::new()),
            DocumentIndexSettings {
                chunk_max_chars: 80,
                chunk_overlap: 10,
                ..DocumentIndexSettings::default()
            },
        )
    }

    fn doc(id: &str, session: Option<&str>, text: &str) -> DocumentInput {
        DocumentInput {
            document_id: id.to_string(),
            title: format!("{id} title"),
            session_id: session.map(SessionId::new),
            text: text.to_string(),
            page: None,
        }
    }

    #[test]
    fn test_add_document_chunks_text() {
        let index = index();
        let text = "The vendor contract renews in March. ".repeat(6);
        let count = index.add_document(doc("contract", None, &text)).unwrap_or(0);
        assert!(count > 1);
        assert_eq!(index.len(), count);

        // Re-adding replaces
        let again = index.add_document(doc("contract", None, "short")).unwrap_or(0);
        assert_eq!(again, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_query_respects_session_scope() {
        let index = index();
        let _ = index.add_document(doc("a", Some("s1"), "Vendor contract renews in March"));
        let _ = index.add_document(doc("b", Some("s2"), "Vendor contract renews in April"));
        let _ = index.add_document(doc("hub", None, "Vendor contract policy handbook"));

        let request = RetrievalRequest::realtime(&EngineConfig::default(), "s1", "vendor contract");
        let fragments = index
            .query(&request, Duration::from_secs(1))
            .unwrap_or_default();
        let ids: Vec<&str> = fragments.iter().map(|f| f.id.as_str()).collect();
        assert!(ids.contains(&"t1:a:0"));
        assert!(ids.contains(&"t1:hub:0"));
        assert!(!ids.contains(&"t1:b:0"));
    }

    #[test]
    fn test_keyword_match_outranks_unrelated() {
        let index = index();
        let _ = index.add_document(doc("a", None, "Quarterly revenue grew twelve percent"));
        let _ = index.add_document(doc("b", None, "Office plants need watering on Fridays"));
        let request = RetrievalRequest::realtime(&EngineConfig::default(), "s", "quarterly revenue");
        let fragments = index
            .query(&request, Duration::from_secs(1))
            .unwrap_or_default();
        assert_eq!(fragments.first().map(|f| f.id.as_str()), Some("t1:a:0"));
    }

    #[test]
    fn test_remove_and_blank_input() {
        let index = index();
        let _ = index.add_document(doc("a", None, "some text"));
        assert_eq!(index.remove_document("a"), 1);
        assert!(index.is_empty());
        assert!(index.add_document(doc("a", None, "   ")).is_err());
        assert!(index.add_document(doc(" ", None, "text")).is_err());
    }
}
