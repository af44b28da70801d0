//! Claim criticality classification.
//!
//! Critical claims (numbers, decisions, commitments, factual assertions) must
//! be supported by evidence or they are withheld. Hedged statements, questions
//! and framing sentences are non-critical.

use crate::config::ClaimPolicy;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// What a claim asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    /// Contains a number, amount, percentage or date.
    Numeric,
    /// States a decision.
    Decision,
    /// States a commitment, owner or deadline.
    Commitment,
    /// Asserts a fact.
    Factual,
    /// Hedged, interrogative or framing text.
    Soft,
}

impl ClaimKind {
    /// Returns true if claims of this kind need support.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        !matches!(self, Self::Soft)
    }
}

/// Decides which claims need evidence.
pub trait ClaimClassifier: Send + Sync {
    /// Returns true if the claim must be supported to appear in an answer.
    fn is_critical(&self, claim: &str) -> bool;
}

static NUMERIC_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\d").ok(),
        Regex::new(r"(?i)[$€£¥]|\b(percent|usd|eur|dollars?|euros?)\b").ok(),
        Regex::new(r"(?i)\b(one|two|three|four|five|six|seven|eight|nine|ten|dozen|hundred|thousand|million|billion|half|twice)\b").ok(),
        Regex::new(r"(?i)\b(jan(uary)?|feb(ruary)?|mar(ch)?|apr(il)?|june?|july?|aug(ust)?|sep(tember)?|oct(ober)?|nov(ember)?|dec(ember)?)\b").ok(),
        Regex::new(r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday|tomorrow|yesterday|next week|next month)\b").ok(),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static DECISION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(decided|decision|agreed|approved|chose|chosen|selected|picked|rejected|settled on)\b").ok(),
        Regex::new(r"(?i)\b(we('re| are|'ll| will) (going to |gonna )?use|let's use|going with)\b").ok(),
        Regex::new(r"(?i)\b(from now on|going forward|henceforth)\b").ok(),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static COMMITMENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(will|shall|must|committed|promised|owns?|owner|assigned|responsible|deadline|due|deliver(s|ed)?)\b").ok(),
        Regex::new(r"(?i)\b(action item|follow[- ]up|by (the )?end of)\b").ok(),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static FACTUAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(is|are|was|were|has|have|had|contains?|requires?|causes?|means|equals?)\b").ok(),
        Regex::new(r"(?i)\b(according to|defined as|consists of|known as)\b").ok(),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static SOFT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(might|may be|maybe|perhaps|possibly|probably|seems?|appears? to|i think|i believe|unclear|not sure)\b").ok(),
        Regex::new(r"(?i)^\s*(based on|in summary|to summarize|overall|here is|here's|the evidence)\b").ok(),
        Regex::new(r"\?\s*$").ok(),
    ]
    .into_iter()
    .flatten()
    .collect()
});

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

/// Regex-driven classifier with configurable extra patterns.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClaimClassifier {
    extra: Vec<Regex>,
    all_critical: bool,
}

impl HeuristicClaimClassifier {
    /// Creates a classifier with the built-in patterns only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier from policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an extra pattern is not a valid regex.
    pub fn from_policy(policy: &ClaimPolicy) -> Result<Self> {
        let extra = policy
            .extra_critical_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::InvalidInput(format!("invalid critical claim pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            extra,
            all_critical: policy.all_claims_critical,
        })
    }

    /// Classifies a claim.
    #[must_use]
    pub fn classify(&self, claim: &str) -> ClaimKind {
        if any_match(&NUMERIC_PATTERNS, claim) {
            ClaimKind::Numeric
        } else if any_match(&SOFT_PATTERNS, claim) {
            ClaimKind::Soft
        } else if any_match(&DECISION_PATTERNS, claim) {
            ClaimKind::Decision
        } else if any_match(&COMMITMENT_PATTERNS, claim) {
            ClaimKind::Commitment
        } else if any_match(&FACTUAL_PATTERNS, claim) {
            ClaimKind::Factual
        } else {
            ClaimKind::Soft
        }
    }
}

impl ClaimClassifier for HeuristicClaimClassifier {
    fn is_critical(&self, claim: &str) -> bool {
        self.all_critical || any_match(&self.extra, claim) || self.classify(claim).is_critical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Revenue grew 12% last quarter.", ClaimKind::Numeric; "percentage")]
    #[test_case("The launch is on Friday.", ClaimKind::Numeric; "weekday")]
    #[test_case("We decided to drop the legacy API.", ClaimKind::Decision; "decision")]
    #[test_case("Maria will send the draft.", ClaimKind::Commitment; "commitment")]
    #[test_case("The vendor contract requires a security review.", ClaimKind::Factual; "fact")]
    #[test_case("It seems the team liked the demo.", ClaimKind::Soft; "hedge")]
    #[test_case("Should we revisit this later?", ClaimKind::Soft; "question")]
    #[test_case("Based on the session notes, the answer follows.", ClaimKind::Soft; "framing")]
    fn test_classify(claim: &str, expected: ClaimKind) {
        assert_eq!(HeuristicClaimClassifier::new().classify(claim), expected);
    }

    #[test]
    fn test_policy_extra_patterns_and_all_critical() {
        let policy = ClaimPolicy {
            extra_critical_patterns: vec![r"(?i)\bsla\b".to_string()],
            all_claims_critical: false,
        };
        let classifier = HeuristicClaimClassifier::from_policy(&policy);
        assert!(classifier.as_ref().is_ok_and(|c| c.is_critical("Perhaps the SLA slipped")));

        let everything = ClaimPolicy {
            extra_critical_patterns: Vec::new(),
            all_claims_critical: true,
        };
        let classifier = HeuristicClaimClassifier::from_policy(&everything);
        assert!(classifier.is_ok_and(|c| c.is_critical("maybe")));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let policy = ClaimPolicy {
            extra_critical_patterns: vec!["(unclosed".to_string()],
            all_claims_critical: false,
        };
        assert!(HeuristicClaimClassifier::from_policy(&policy).is_err());
    }
}
