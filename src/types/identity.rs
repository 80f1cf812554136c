//! Validated identities for mailboxes and trustees.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Error raised when an identity string is not address-shaped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Identity was empty after trimming.
    #[error("Identity is empty")]
    Empty,
    /// Identity does not look like `local@domain.tld`.
    #[error("Identity is not address-shaped: {0:?}")]
    NotAddress(String),
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("address pattern is valid")
    })
}

/// An address-shaped mailbox or trustee identity.
///
/// Identities are lowercased on parse so that `Alice@Contoso.com` and
/// `alice@contoso.com` name the same node. Implements `Ord` so that
/// identity sets and maps iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse and normalize an identity.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        if !address_pattern().is_match(trimmed) {
            return Err(ValidationError::NotAddress(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Get the normalized identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a list of identities, failing on the first malformed entry.
pub fn parse_identities<I, S>(values: I) -> Result<Vec<Identity>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| Identity::parse(v.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let id = Identity::parse("  Alice@Contoso.COM ").unwrap();
        assert_eq!(id.as_str(), "alice@contoso.com");
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Identity::parse("   "), Err(ValidationError::Empty));
        assert!(matches!(Identity::parse("alice"), Err(ValidationError::NotAddress(_))));
        assert!(matches!(Identity::parse("alice@contoso"), Err(ValidationError::NotAddress(_))));
        assert!(matches!(Identity::parse("a@b@contoso.com"), Err(ValidationError::NotAddress(_))));
        assert!(matches!(Identity::parse("al ice@contoso.com"), Err(ValidationError::NotAddress(_))));
        assert!(matches!(Identity::parse("alice@contoso..com"), Err(ValidationError::NotAddress(_))));
    }

    #[test]
    fn test_serde_validates() {
        let ok: Identity = serde_json::from_str("\"Bob@Fabrikam.com\"").unwrap();
        assert_eq!(ok.as_str(), "bob@fabrikam.com");

        let bad: Result<Identity, _> = serde_json::from_str("\"not-an-address\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_parse_identities_fails_fast() {
        let parsed = parse_identities(["a@x.com", "b@x.com"]).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parse_identities(["a@x.com", "nope"]).is_err());
    }
}
