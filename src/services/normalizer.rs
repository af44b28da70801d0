//! Per-tier score normalization.
//!
//! Raw scores are tier-local. Before fragments from different tiers can be
//! ranked together, each tier's scores pass through that tier's normalizer and
//! land in `[0, 1]`.

use crate::config::{NormalizerKind, RankingPolicy};
use crate::models::Tier;
use std::sync::Arc;

/// Maps one tier's raw scores into `[0, 1]`.
pub trait ScoreNormalizer: Send + Sync {
    /// Normalizes a batch of raw scores from one tier, preserving order.
    fn normalize(&self, raw: &[f32]) -> Vec<f32>;
}

/// Clamps scores into `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampNormalizer;

impl ScoreNormalizer for ClampNormalizer {
    fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        raw.iter().map(|s| s.clamp(0.0, 1.0)).collect()
    }
}

/// Divides by the batch maximum, so the best fragment scores 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxScaleNormalizer;

impl ScoreNormalizer for MaxScaleNormalizer {
    fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        let max = raw.iter().copied().fold(0.0_f32, f32::max);
        if max <= 0.0 {
            return vec![0.0; raw.len()];
        }
        raw.iter().map(|s| (s / max).clamp(0.0, 1.0)).collect()
    }
}

/// Logistic squashing: `1 / (1 + e^(-steepness * (s - midpoint)))`.
#[derive(Debug, Clone, Copy)]
pub struct LogisticNormalizer {
    midpoint: f32,
    steepness: f32,
}

impl LogisticNormalizer {
    /// Creates a logistic normalizer.
    #[must_use]
    pub const fn new(midpoint: f32, steepness: f32) -> Self {
        Self {
            midpoint,
            steepness,
        }
    }
}

impl ScoreNormalizer for LogisticNormalizer {
    fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        raw.iter()
            .map(|s| 1.0 / (1.0 + (-self.steepness * (s - self.midpoint)).exp()))
            .collect()
    }
}

/// Normalizers keyed by tier.
#[derive(Clone)]
pub struct NormalizerRegistry {
    normalizers: [Arc<dyn ScoreNormalizer>; 4],
}

impl NormalizerRegistry {
    /// Builds the registry from ranking policy.
    #[must_use]
    pub fn from_policy(policy: &RankingPolicy) -> Self {
        Self {
            normalizers: policy.normalizers.map(build),
        }
    }

    /// Replaces one tier's normalizer.
    #[must_use]
    pub fn with(mut self, tier: Tier, normalizer: Arc<dyn ScoreNormalizer>) -> Self {
        self.normalizers[tier.index()] = normalizer;
        self
    }

    /// Returns a tier's normalizer.
    #[must_use]
    pub fn get(&self, tier: Tier) -> &dyn ScoreNormalizer {
        self.normalizers[tier.index()].as_ref()
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::from_policy(&RankingPolicy::default())
    }
}

fn build(kind: NormalizerKind) -> Arc<dyn ScoreNormalizer> {
    match kind {
        NormalizerKind::Clamp => Arc::new(ClampNormalizer),
        NormalizerKind::MaxScale => Arc::new(MaxScaleNormalizer),
        NormalizerKind::Logistic {
            midpoint,
            steepness,
        } => Arc::new(LogisticNormalizer::new(midpoint, steepness)),
    }
}
