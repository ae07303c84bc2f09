//! Submitter identity
//!
//! The identity is the unit of rate-limiting granularity. It is opaque to the
//! rest of the crate; the only rule enforced here is that it is present and
//! non-empty, which is a caller-side validation concern rather than a limiter
//! decision.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when a submission carries no usable identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The identity field was absent from the request
    #[error("user_id is required")]
    Missing,

    /// The identity field was present but empty
    #[error("user_id must not be empty")]
    Empty,
}

/// Validated, non-empty submitter key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Validate a raw identity
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(raw))
    }

    /// Validate an optional identity, as received from the admission boundary
    pub fn from_optional(raw: Option<&str>) -> Result<Self, IdentityError> {
        match raw {
            Some(raw) => Self::parse(raw),
            None => Err(IdentityError::Missing),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let identity = Identity::parse("user-123").unwrap();
        assert_eq!(identity.as_str(), "user-123");
        assert_eq!(identity.to_string(), "user-123");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Identity::parse(""), Err(IdentityError::Empty));
    }

    #[test]
    fn test_from_optional_missing() {
        assert_eq!(Identity::from_optional(None), Err(IdentityError::Missing));
        assert!(Identity::from_optional(Some("u1")).is_ok());
    }

    #[test]
    fn test_whitespace_is_opaque() {
        // Identities are opaque keys; only emptiness is rejected
        assert!(Identity::parse(" ").is_ok());
    }

    #[test]
    fn test_deserialize_rejects_empty() {
        let ok: Identity = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(ok.as_str(), "u1");

        let err = serde_json::from_str::<Identity>("\"\"");
        assert!(err.is_err());
    }
}
