//! Identifier types used throughout the inventory.
//!
//! CM handle ids are opaque strings chosen by the registering plugin, so
//! unlike internally generated ids they have to be validated on the way in.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Error returned when a string is not a usable CM handle id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cm handle id '{id}': {reason}")]
pub struct InvalidCmHandleId {
    pub id: String,
    pub reason: &'static str,
}

/// Identifier of a managed CM handle.
///
/// Construction through [`CmHandleId::new`] never fails; ids coming from
/// external callers go through [`CmHandleId::parse`] which rejects empty ids
/// and ids with characters outside `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CmHandleId(String);

impl CmHandleId {
    /// Wraps a string without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses and validates an externally supplied id.
    pub fn parse(s: &str) -> Result<Self, InvalidCmHandleId> {
        if s.is_empty() {
            return Err(InvalidCmHandleId {
                id: s.to_string(),
                reason: "id is empty",
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidCmHandleId {
                id: s.to_string(),
                reason: "id contains invalid characters",
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Whether this id would pass [`CmHandleId::parse`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Self::parse(&self.0).is_ok()
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CmHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CmHandleId {
    type Err = InvalidCmHandleId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for CmHandleId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Borrow<str> for CmHandleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Cache key of a forwarded subscription: client id followed by the
/// subscription name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    #[must_use]
    pub fn new(client_id: &str, subscription_name: &str) -> Self {
        Self(format!("{client_id}{subscription_name}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
