//! Evidence tiers, source references and fragments.

use super::{FragmentId, SessionId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Evidence tier, in trust/cost order.
///
/// Lower numbers are more authoritative and cheaper to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 0: live session memory (transcript, visual events, recap windows).
    SessionMemory,
    /// Tier 1: documents uploaded to the session or knowledge hub.
    Documents,
    /// Tier 2: approved web search.
    WebSearch,
    /// Tier 3: best-effort deep research.
    DeepResearch,
}

impl Tier {
    /// All tiers in query order.
    pub const ALL: [Self; 4] = [
        Self::SessionMemory,
        Self::Documents,
        Self::WebSearch,
        Self::DeepResearch,
    ];

    /// Returns the tier number (0..=3).
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::SessionMemory => 0,
            Self::Documents => 1,
            Self::WebSearch => 2,
            Self::DeepResearch => 3,
        }
    }

    /// Looks a tier up by number.
    #[must_use]
    pub const fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::SessionMemory),
            1 => Some(Self::Documents),
            2 => Some(Self::WebSearch),
            3 => Some(Self::DeepResearch),
            _ => None,
        }
    }

    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionMemory => "session_memory",
            Self::Documents => "documents",
            Self::WebSearch => "web_search",
            Self::DeepResearch => "deep_research",
        }
    }

    /// Returns true for tiers that need a human-approved proposal before use.
    #[must_use]
    pub const fn is_gated(self) -> bool {
        matches!(self, Self::WebSearch | Self::DeepResearch)
    }

    /// Index into per-tier arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self.number() as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}:{}", self.number(), self.as_str())
    }
}

/// Where a fragment came from, resolvable by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// A span of the live transcript.
    Transcript {
        /// Session the transcript belongs to.
        session_id: SessionId,
        /// Span start, milliseconds from session start.
        start_ms: u64,
        /// Span end, milliseconds from session start.
        end_ms: u64,
        /// Speaker label, if diarization produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speaker: Option<String>,
    },
    /// A visual event (slide change, whiteboard, detected object) at a frame.
    VisualFrame {
        /// Session the frame belongs to.
        session_id: SessionId,
        /// Frame timestamp, milliseconds from session start.
        timestamp_ms: u64,
        /// Event type such as `slide_change` or `object`.
        event_type: String,
    },
    /// A recap window summarizing part of the session.
    Recap {
        /// Session the recap belongs to.
        session_id: SessionId,
        /// Window start, milliseconds from session start.
        start_ms: u64,
        /// Window end, milliseconds from session start.
        end_ms: u64,
    },
    /// A passage of an uploaded document.
    Document {
        /// Document identifier.
        document_id: String,
        /// Document title.
        title: String,
        /// Chunk index within the document.
        chunk_index: usize,
        /// Page number, when extraction kept it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
    },
    /// A web page.
    Url {
        /// Page URL.
        url: String,
        /// Page title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

impl SourceRef {
    /// Key identifying the underlying document for deduplication.
    ///
    /// Session material collapses per session, documents per document id and
    /// web pages per URL.
    #[must_use]
    pub fn document_key(&self) -> String {
        match self {
            Self::Transcript { session_id, .. }
            | Self::VisualFrame { session_id, .. }
            | Self::Recap { session_id, .. } => format!("session:{session_id}"),
            Self::Document { document_id, .. } => format!("doc:{document_id}"),
            Self::Url { url, .. } => format!("url:{}", url.trim_end_matches('/')),
        }
    }
}

/// Formats milliseconds as `mm:ss`.
fn fmt_offset(ms: u64) -> String {
    let total = ms / 1000;
    format!("{:02}:{:02}", total / 60, total % 60)
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcript {
                start_ms,
                end_ms,
                speaker,
                ..
            } => {
                write!(f, "[{}-{} | transcript", fmt_offset(*start_ms), fmt_offset(*end_ms))?;
                if let Some(speaker) = speaker {
                    write!(f, " | {speaker}")?;
                }
                f.write_str("]")
            },
            Self::VisualFrame {
                timestamp_ms,
                event_type,
                ..
            } => write!(f, "[{} | {event_type}]", fmt_offset(*timestamp_ms)),
            Self::Recap {
                start_ms, end_ms, ..
            } => write!(f, "[{}-{} | recap]", fmt_offset(*start_ms), fmt_offset(*end_ms)),
            Self::Document {
                title,
                chunk_index,
                page,
                ..
            } => match page {
                Some(page) => write!(f, "{title} (p. {page}, chunk {chunk_index})"),
                None => write!(f, "{title} (chunk {chunk_index})"),
            },
            Self::Url { url, title } => match title {
                Some(title) => write!(f, "{title} <{url}>"),
                None => write!(f, "<{url}>"),
            },
        }
    }
}

/// A scored piece of evidence produced by one tier.
///
/// Fragments are immutable once produced. Downstream components share them
/// through `Arc<EvidenceFragment>` rather than copying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFragment {
    /// Identifier, unique within the producing tier.
    pub id: FragmentId,
    /// Producing tier.
    pub tier: Tier,
    /// Resolvable source location.
    pub source_ref: SourceRef,
    /// Evidence text.
    pub text: String,
    /// Tier-local relevance score; not comparable across tiers.
    pub score: f32,
    /// When the evidence was captured (Unix epoch milliseconds).
    pub recency_ts: u64,
    /// Distance in embedding space, when the tier uses vectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_distance: Option<f32>,
}

impl EvidenceFragment {
    /// Creates a fragment with no embedding distance.
    #[must_use]
    pub fn new(
        id: impl Into<FragmentId>,
        tier: Tier,
        source_ref: SourceRef,
        text: impl Into<String>,
        score: f32,
        recency_ts: u64,
    ) -> Self {
        Self {
            id: id.into(),
            tier,
            source_ref,
            text: text.into(),
            score,
            recency_ts,
            embedding_distance: None,
        }
    }

    /// Sets the embedding distance.
    #[must_use]
    pub const fn with_embedding_distance(mut self, distance: f32) -> Self {
        self.embedding_distance = Some(distance);
        self
    }

    /// Checks that the fragment can be aggregated for the given tier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AggregationError`] when the id or text is blank, the score
    /// is not finite, or the fragment claims a different tier than its adapter.
    pub fn validate(&self, expected_tier: Tier) -> Result<()> {
        let reason = if self.id.is_blank() {
            Some("blank fragment id".to_string())
        } else if self.text.trim().is_empty() {
            Some("empty text".to_string())
        } else if !self.score.is_finite() {
            Some(format!("non-finite score {}", self.score))
        } else if self.tier != expected_tier {
            Some(format!(
                "fragment tagged {} returned by {} adapter",
                self.tier, expected_tier
            ))
        } else if self.embedding_distance.is_some_and(|d| !d.is_finite()) {
            Some("non-finite embedding distance".to_string())
        } else {
            None
        };

        reason.map_or(Ok(()), |reason| {
            Err(Error::AggregationError {
                fragment_id: self.id.to_string(),
                reason,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(session: &str) -> SourceRef {
        SourceRef::Transcript {
            session_id: SessionId::new(session),
            start_ms: 61_000,
            end_ms: 75_500,
            speaker: Some("Linh".to_string()),
        }
    }

    #[test]
    fn test_tier_numbers_roundtrip() {
        for tier in Tier::ALL {
            assert_eq!(Tier::from_number(tier.number()), Some(tier));
        }
        assert_eq!(Tier::from_number(4), None);
        assert!(Tier::SessionMemory < Tier::DeepResearch);
    }

    #[test]
    fn test_only_external_tiers_are_gated() {
        assert!(!Tier::SessionMemory.is_gated());
        assert!(!Tier::Documents.is_gated());
        assert!(Tier::WebSearch.is_gated());
        assert!(Tier::DeepResearch.is_gated());
    }

    #[test]
    fn test_source_ref_display() {
        assert_eq!(
            transcript("s1").to_string(),
            "[01:01-01:15 | transcript | Linh]"
        );
        let frame = SourceRef::VisualFrame {
            session_id: SessionId::new("s1"),
            timestamp_ms: 125_000,
            event_type: "slide_change".to_string(),
        };
        assert_eq!(frame.to_string(), "[02:05 | slide_change]");
        let doc = SourceRef::Document {
            document_id: "d1".to_string(),
            title: "Budget plan".to_string(),
            chunk_index: 2,
            page: Some(4),
        };
        assert_eq!(doc.to_string(), "Budget plan (p. 4, chunk 2)");
    }

    #[test]
    fn test_document_key_groups_session_material() {
        let frame = SourceRef::VisualFrame {
            session_id: SessionId::new("s1"),
            timestamp_ms: 0,
            event_type: "object".to_string(),
        };
        assert_eq!(transcript("s1").document_key(), frame.document_key());
        let a = SourceRef::Url {
            url: "https://example.com/a/".to_string(),
            title: None,
        };
        let b = SourceRef::Url {
            url: "https://example.com/a".to_string(),
            title: Some("A".to_string()),
        };
        assert_eq!(a.document_key(), b.document_key());
    }

    #[test]
    fn test_validate_rejects_malformed_fragments() {
        let good = EvidenceFragment::new(
            "t0:1",
            Tier::SessionMemory,
            transcript("s1"),
            "we approved the budget",
            0.8,
            1,
        );
        assert!(good.validate(Tier::SessionMemory).is_ok());

        let mut nan = good.clone();
        nan.score = f32::NAN;
        assert!(matches!(
            nan.validate(Tier::SessionMemory),
            Err(Error::AggregationError { .. })
        ));

        let mut empty = good.clone();
        empty.text = "  ".to_string();
        assert!(empty.validate(Tier::SessionMemory).is_err());

        assert!(good.validate(Tier::Documents).is_err());
    }
}
