//! Identity and optimistic-concurrency types shared by every entity-storage
//! component.

use std::fmt;

/// Uniquely names an entity: its domain type plus its identifier within
/// that type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityIdentifier {
    pub entity_type: &'static str,
    pub entity_id: String,
}

impl EntityIdentifier {
    pub fn new(entity_type: &'static str, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Opaque optimistic-concurrency token. `ConcurrencyToken::any()` represents
/// "no check required" -- a commit carrying it succeeds regardless of the
/// record's current token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcurrencyToken(Option<String>);

impl ConcurrencyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Matches any token the storage engine currently holds.
    pub fn any() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// A concurrency check passes when either side accepts any token, or
    /// both sides name the same one.
    pub fn matches(&self, other: &ConcurrencyToken) -> bool {
        match (&self.0, &other.0) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }
}

impl Default for ConcurrencyToken {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(token) => write!(f, "{token}"),
            None => write!(f, "<any>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_token_matches_everything() {
        assert!(ConcurrencyToken::any().matches(&ConcurrencyToken::new("v1")));
        assert!(ConcurrencyToken::new("v1").matches(&ConcurrencyToken::any()));
    }

    #[test]
    fn distinct_tokens_do_not_match() {
        assert!(!ConcurrencyToken::new("v1").matches(&ConcurrencyToken::new("v2")));
    }
}
