//! Deterministic hashed bag-of-words embeddings.

use super::Embedder;
use crate::text::tokenize;
use crate::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hashes content tokens into a fixed-size, L2-normalized vector.
///
/// Texts sharing vocabulary land close together regardless of word order,
/// which is all the in-memory tiers need for a relevance signal.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    /// Default embedding dimensions.
    pub const DEFAULT_DIMENSIONS: usize = 384;

    /// Upper bound on tokens hashed per text.
    const MAX_TOKENS: usize = 1000;

    /// Creates an embedder with the default dimensions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder with custom dimensions (minimum 8).
    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    /// Spreads one token hash over eight dimensions.
    fn distribute_hash(embedding: &mut [f32], hash: u64, dimensions: usize) {
        for j in 0..8 {
            let idx = (hash >> (j * 8)) as usize % dimensions;
            let value = ((hash >> (j * 4)) & 0xFF) as f32 / 255.0 - 0.5;
            embedding[idx] += value;
        }
    }

    /// Normalizes an embedding vector in place.
    fn normalize_embedding(embedding: &mut [f32]) {
        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if norm_sq <= 0.0 {
            return;
        }
        let inv_norm = norm_sq.sqrt().recip();
        for v in embedding.iter_mut() {
            *v *= inv_norm;
        }
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in tokenize(text).iter().take(Self::MAX_TOKENS) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            Self::distribute_hash(&mut embedding, hasher.finish(), self.dimensions);
        }
        Self::normalize_embedding(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_embed_is_deterministic_and_normalized() {
        let embedder = HashedEmbedder::new();
        let a = embedder.embed("quarterly budget review").unwrap_or_default();
        let b = embedder.embed("quarterly budget review").unwrap_or_default();
        assert_eq!(a, b);
        assert_eq!(a.len(), HashedEmbedder::DEFAULT_DIMENSIONS);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_word_order_does_not_matter() {
        let embedder = HashedEmbedder::with_dimensions(64);
        let a = embedder.embed("budget approved hiring").unwrap_or_default();
        let b = embedder.embed("hiring approved budget").unwrap_or_default();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_text_is_rejected() {
        assert!(HashedEmbedder::new().embed("   ").is_err());
    }

    #[test]
    fn test_stop_words_only_yields_zero_vector() {
        let embedding = HashedEmbedder::new().embed("the and of").unwrap_or_default();
        assert!(embedding.iter().all(|v| v.abs() < f32::EPSILON));
    }
}
