//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty or whitespace.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a single question flowing through the engine.
    RequestId
);

string_id!(
    /// Identifier of a meeting or study session.
    SessionId
);

string_id!(
    /// Identifier of an evidence fragment, unique within the tier that produced it.
    FragmentId
);

string_id!(
    /// Identifier of a tool proposal awaiting human approval.
    ProposalId
);

impl RequestId {
    /// Generates a new time-ordered request identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("req_{}", uuid::Uuid::now_v7().simple()))
    }
}

impl ProposalId {
    /// Generates a new random proposal identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("prop_{}", uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_prefixed_and_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert!(a.as_str().starts_with("req_"));
        assert_ne!(a, b);
        assert!(ProposalId::generate().as_str().starts_with("prop_"));
    }

    #[test]
    fn test_blank_detection() {
        assert!(FragmentId::new("  ").is_blank());
        assert!(!FragmentId::from("t0:seg-1").is_blank());
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = SessionId::new("standup");
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"standup\"");
    }
}
