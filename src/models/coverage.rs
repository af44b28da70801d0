//! Coverage assessments.

use super::{RequestId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Whether gathered evidence is enough to answer without escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageVerdict {
    /// Best score meets the threshold and at least one fragment exists.
    Sufficient,
    /// Escalation (or refusal) is needed.
    Insufficient,
}

impl CoverageVerdict {
    /// Returns the verdict as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sufficient => "sufficient",
            Self::Insufficient => "insufficient",
        }
    }
}

impl fmt::Display for CoverageVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one coverage check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageAssessment {
    /// Request this assessment belongs to.
    pub request_id: RequestId,
    /// Tiers queried so far.
    pub tiers_queried: BTreeSet<Tier>,
    /// Highest normalized fragment score.
    pub best_score: f32,
    /// Number of fragments after deduplication.
    pub fragment_count: usize,
    /// The verdict.
    pub verdict: CoverageVerdict,
}

impl CoverageAssessment {
    /// Evaluates coverage against a threshold.
    ///
    /// Sufficient iff `best_score >= threshold` and `fragment_count >= 1`.
    #[must_use]
    pub fn evaluate(
        request_id: RequestId,
        tiers_queried: BTreeSet<Tier>,
        best_score: f32,
        fragment_count: usize,
        threshold: f32,
    ) -> Self {
        let verdict = if fragment_count >= 1 && best_score >= threshold {
            CoverageVerdict::Sufficient
        } else {
            CoverageVerdict::Insufficient
        };
        Self {
            request_id,
            tiers_queried,
            best_score,
            fragment_count,
            verdict,
        }
    }

    /// Returns true if the verdict is sufficient.
    #[must_use]
    pub const fn is_sufficient(&self) -> bool {
        matches!(self.verdict, CoverageVerdict::Sufficient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.91, 1, 0.6, CoverageVerdict::Sufficient ; "score above threshold")]
    #[test_case(0.6, 3, 0.6, CoverageVerdict::Sufficient ; "score equal to threshold")]
    #[test_case(0.2, 4, 0.6, CoverageVerdict::Insufficient ; "score below threshold")]
    #[test_case(0.9, 0, 0.6, CoverageVerdict::Insufficient ; "no fragments")]
    fn test_evaluate(best: f32, count: usize, threshold: f32, expected: CoverageVerdict) {
        let assessment = CoverageAssessment::evaluate(
            RequestId::new("r"),
            BTreeSet::from([Tier::SessionMemory]),
            best,
            count,
            threshold,
        );
        assert_eq!(assessment.verdict, expected);
    }
}
