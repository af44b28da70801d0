//! Text utilities shared by the adapters, the aggregator and the assembler.
//!
//! Everything here is deterministic: the same input always yields the same
//! normalized form, token set and hash, which keeps deduplication and claim
//! grounding reproducible across runs.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Common English stop words excluded from token sets.
pub static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "can", "this",
        "that", "these", "those", "it", "its", "i", "you", "he", "she", "we", "they", "me", "him",
        "her", "us", "them", "my", "your", "our", "their", "what", "which", "who", "whom", "when",
        "where", "why", "how", "all", "each", "every", "both", "few", "more", "most", "other",
        "some", "such", "no", "not", "only", "own", "same", "so", "than", "too", "very", "just",
        "also", "now", "here", "there", "then", "about", "into", "over", "after", "before",
        "again", "any", "if", "because", "while", "up", "down", "out", "off", "yes", "ok",
        "okay", "um", "uh", "like",
    ]
    .into_iter()
    .collect()
});

/// Normalizes content: trimmed, lowercased, whitespace collapsed.
///
/// ```rust
/// use groundline::text::normalize;
///
/// assert_eq!(normalize("  Ship  the\nBETA "), "ship the beta");
/// ```
#[must_use]
pub fn normalize(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the normalized content, hex encoded (64 chars).
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Strips a plural `s` so "budgets" and "budget" match.
fn stem(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

/// Splits text into lowercase content tokens.
///
/// Numbers are kept regardless of length (they matter for numeric claims);
/// other tokens need two characters and must not be stop words.
#[must_use]
pub fn tokenize(content: &str) -> Vec<String> {
    content
        .split(|c: char| !(c.is_alphanumeric() || c == '%'))
        .map(|raw| raw.trim_matches('%').to_lowercase())
        .filter(|token| {
            !token.is_empty()
                && (token.chars().all(|c| c.is_ascii_digit())
                    || (token.chars().count() >= 2 && !STOP_WORDS.contains(token.as_str())))
        })
        .map(|token| stem(&token).to_string())
        .collect()
}

/// Distinct content tokens.
#[must_use]
pub fn token_set(content: &str) -> HashSet<String> {
    tokenize(content).into_iter().collect()
}

/// Jaccard similarity of two token sets, `0.0` when both are empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Fraction of the claim's tokens that appear in the evidence.
///
/// Returns `0.0` for a claim with no content tokens.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn containment(claim: &HashSet<String>, evidence: &HashSet<String>) -> f32 {
    if claim.is_empty() {
        return 0.0;
    }
    claim.intersection(evidence).count() as f32 / claim.len() as f32
}

/// Splits text into sentences.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace (so `12.5` stays
/// intact) or at a newline. Empty pieces are skipped.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(idx),
            '.' | '!' | '?' => match chars.peek() {
                None => Some(idx + c.len_utf8()),
                Some((_, next)) if next.is_whitespace() => Some(idx + c.len_utf8()),
                Some(_) => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            let piece = text[start..end].trim();
            if !piece.is_empty() {
                sentences.push(piece);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Splits text into overlapping character windows.
///
/// `overlap` is clamped to `max_chars - 1`; chunks are trimmed and empty chunks
/// are skipped. Returns the whole (trimmed) text when it already fits.
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let max_chars = max_chars.max(1);
    if chars.len() <= max_chars {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let overlap = overlap.min(max_chars - 1);
    let step = max_chars - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ignores_formatting() {
        assert_eq!(
            content_hash("Use PostgreSQL for storage"),
            content_hash("  use  postgresql for\tstorage ")
        );
        assert_eq!(content_hash("x").len(), 64);
    }

    #[test]
    fn test_tokenize_drops_stop_words_keeps_numbers() {
        let tokens = tokenize("We will ship the 2 betas in Q3, up 12%");
        assert!(tokens.contains(&"ship".to_string()));
        assert!(tokens.contains(&"2".to_string()));
        assert!(tokens.contains(&"beta".to_string()));
        assert!(tokens.contains(&"12".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"we".to_string()));
    }

    #[test]
    fn test_jaccard_and_containment() {
        let a = token_set("budget approved for hiring");
        let b = token_set("the hiring budget was approved");
        assert!((jaccard(&a, &b) - 1.0).abs() < f32::EPSILON);

        let claim = token_set("budget approved for marketing");
        assert!((containment(&claim, &b) - 2.0 / 3.0).abs() < 1e-6);
        assert!(containment(&HashSet::new(), &b).abs() < f32::EPSILON);
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let sentences = split_sentences("Revenue grew 12.5% last year. Costs fell!\nNext steps? Hire");
        assert_eq!(
            sentences,
            vec!["Revenue grew 12.5% last year.", "Costs fell!", "Next steps?", "Hire"]
        );
    }

    #[test]
    fn test_chunk_text_overlap() {
        let chunks = chunk_text("abcdefghij", 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
        assert_eq!(chunk_text("short", 100, 10), vec!["short"]);
        assert!(chunk_text("   ", 100, 10).is_empty());
    }

    #[test]
    fn test_chunk_text_clamps_overlap() {
        let chunks = chunk_text("abcdef", 3, 10);
        assert_eq!(chunks.first().map(String::as_str), Some("abc"));
        assert_eq!(chunks.last().map(String::as_str), Some("def"));
        assert_eq!(chunks.len(), 4);
    }
}
